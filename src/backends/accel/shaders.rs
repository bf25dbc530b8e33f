//! WGSL compute shaders for the GF(2) kernels
//!
//! WGSL has no 64-bit integers, so every packed word is a `vec2<u32>` holding
//! (low, high) halves, which is the byte layout of a `u64` on little-endian hosts.
//! All kernels use 16×16 workgroups; x indexes output rows (or table entries) and
//! y indexes output words.

use super::device::KernelId;

/// Parameter block shared by every kernel (matches `KernelParams`)
const PARAMS_STRUCT: &str = r#"
struct Params {
    a_rows: u32,
    a_cols: u32,
    b_cols: u32,
    words_per_row_a: u32,
    words_per_row_b: u32,
    words_per_row_result: u32,
    chunk_bits: u32,
    num_tables: u32,
}

fn word_bit(w: vec2<u32>, bit: u32) -> u32 {
    if (bit < 32u) {
        return (w.x >> bit) & 1u;
    }
    return (w.y >> (bit - 32u)) & 1u;
}

fn with_bit(w: vec2<u32>, bit: u32) -> vec2<u32> {
    if (bit < 32u) {
        return vec2<u32>(w.x | (1u << bit), w.y);
    }
    return vec2<u32>(w.x, w.y | (1u << (bit - 32u)));
}

fn word_parity(w: vec2<u32>) -> u32 {
    return (countOneBits(w.x) + countOneBits(w.y)) & 1u;
}
"#;

/// C[row, word] = XOR of B rows selected by the set bits of A's row
pub const NAIVE_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read> b: array<vec2<u32>>;
@group(0) @binding(2) var<storage, read_write> c: array<vec2<u32>>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    let word = gid.y;
    if (row >= params.a_rows || word >= params.words_per_row_result) {
        return;
    }

    var acc = vec2<u32>(0u, 0u);
    for (var k = 0u; k < params.a_cols; k = k + 1u) {
        let a_word = a[row * params.words_per_row_a + k / 64u];
        if (word_bit(a_word, k % 64u) == 1u) {
            acc = acc ^ b[k * params.words_per_row_b + word];
        }
    }
    c[row * params.words_per_row_result + word] = acc;
}
"#;

/// 64 parities of A's row against consecutive Bᵀ rows
pub const TRANSPOSED_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read> b_t: array<vec2<u32>>;
@group(0) @binding(2) var<storage, read_write> c: array<vec2<u32>>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    let word = gid.y;
    if (row >= params.a_rows || word >= params.words_per_row_result) {
        return;
    }

    let wpr = params.words_per_row_a;
    let a_base = row * wpr;
    var packed = vec2<u32>(0u, 0u);
    for (var bit = 0u; bit < 64u; bit = bit + 1u) {
        let col = word * 64u + bit;
        if (col >= params.b_cols) {
            break;
        }
        let b_base = col * wpr;
        var acc = vec2<u32>(0u, 0u);
        for (var i = 0u; i < wpr; i = i + 1u) {
            acc = acc ^ (a[a_base + i] & b_t[b_base + i]);
        }
        if (word_parity(acc) == 1u) {
            packed = with_bit(packed, bit);
        }
    }
    c[row * params.words_per_row_result + word] = packed;
}
"#;

/// Shared-dimension word kw: stage 16 A words and 64×16 B words, then accumulate
pub const TILED_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read> b: array<vec2<u32>>;
@group(0) @binding(2) var<storage, read_write> c: array<vec2<u32>>;
@group(0) @binding(3) var<uniform> params: Params;

var<workgroup> a_tile: array<vec2<u32>, 16>;
var<workgroup> b_tile: array<vec2<u32>, 1024>;

@compute @workgroup_size(16, 16)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(local_invocation_index) lidx: u32,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let row = gid.x;
    let word = gid.y;
    var acc = vec2<u32>(0u, 0u);

    for (var kw = 0u; kw < params.words_per_row_a; kw = kw + 1u) {
        if (lid.y == 0u) {
            var a_word = vec2<u32>(0u, 0u);
            if (row < params.a_rows) {
                a_word = a[row * params.words_per_row_a + kw];
            }
            a_tile[lid.x] = a_word;
        }
        for (var s = 0u; s < 4u; s = s + 1u) {
            let idx = lidx + s * 256u;
            let b_row = kw * 64u + idx / 16u;
            let b_word = wid.y * 16u + idx % 16u;
            var b_value = vec2<u32>(0u, 0u);
            if (b_row < params.a_cols && b_word < params.words_per_row_b) {
                b_value = b[b_row * params.words_per_row_b + b_word];
            }
            b_tile[idx] = b_value;
        }
        workgroupBarrier();

        let a_word = a_tile[lid.x];
        for (var bit = 0u; bit < 32u; bit = bit + 1u) {
            if (((a_word.x >> bit) & 1u) == 1u) {
                acc = acc ^ b_tile[bit * 16u + lid.y];
            }
            if (((a_word.y >> bit) & 1u) == 1u) {
                acc = acc ^ b_tile[(bit + 32u) * 16u + lid.y];
            }
        }
        workgroupBarrier();
    }

    if (row < params.a_rows && word < params.words_per_row_result) {
        c[row * params.words_per_row_result + word] = acc;
    }
}
"#;

/// Transposed kernel with four words per step in four lane accumulators
pub const VECTORIZED_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read> b_t: array<vec2<u32>>;
@group(0) @binding(2) var<storage, read_write> c: array<vec2<u32>>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    let word = gid.y;
    if (row >= params.a_rows || word >= params.words_per_row_result) {
        return;
    }

    let wpr = params.words_per_row_a;
    let a_base = row * wpr;
    let steps = wpr / 4u;
    var packed = vec2<u32>(0u, 0u);
    for (var bit = 0u; bit < 64u; bit = bit + 1u) {
        let col = word * 64u + bit;
        if (col >= params.b_cols) {
            break;
        }
        let b_base = col * wpr;
        var lane0 = vec2<u32>(0u, 0u);
        var lane1 = vec2<u32>(0u, 0u);
        var lane2 = vec2<u32>(0u, 0u);
        var lane3 = vec2<u32>(0u, 0u);
        for (var s = 0u; s < steps; s = s + 1u) {
            let i = s * 4u;
            lane0 = lane0 ^ (a[a_base + i] & b_t[b_base + i]);
            lane1 = lane1 ^ (a[a_base + i + 1u] & b_t[b_base + i + 1u]);
            lane2 = lane2 ^ (a[a_base + i + 2u] & b_t[b_base + i + 2u]);
            lane3 = lane3 ^ (a[a_base + i + 3u] & b_t[b_base + i + 3u]);
        }
        var acc = lane0 ^ lane1 ^ lane2 ^ lane3;
        for (var i = steps * 4u; i < wpr; i = i + 1u) {
            acc = acc ^ (a[a_base + i] & b_t[b_base + i]);
        }
        if (word_parity(acc) == 1u) {
            packed = with_bit(packed, bit);
        }
    }
    c[row * params.words_per_row_result + word] = packed;
}
"#;

/// table[t * 2^k + v] = XOR of B rows t*k + p for the set bits p of v
pub const M4R_BUILD_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> b: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read_write> lookup: array<vec2<u32>>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let entry = gid.x;
    let word = gid.y;
    let k = params.chunk_bits;
    if (entry >= (params.num_tables << k) || word >= params.words_per_row_b) {
        return;
    }

    let t = entry >> k;
    let v = entry & ((1u << k) - 1u);
    var acc = vec2<u32>(0u, 0u);
    for (var p = 0u; p < k; p = p + 1u) {
        let b_row = t * k + p;
        if (((v >> p) & 1u) == 1u && b_row < params.a_cols) {
            acc = acc ^ b[b_row * params.words_per_row_b + word];
        }
    }
    lookup[entry * params.words_per_row_b + word] = acc;
}
"#;

/// One table lookup per k-bit chunk of A's row
pub const M4R_MULTIPLY_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<vec2<u32>>;
@group(0) @binding(1) var<storage, read> lookup: array<vec2<u32>>;
@group(0) @binding(2) var<storage, read_write> c: array<vec2<u32>>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    let word = gid.y;
    if (row >= params.a_rows || word >= params.words_per_row_result) {
        return;
    }

    let k = params.chunk_bits;
    let chunks_per_word = 64u / k;
    let mask = (1u << k) - 1u;
    var acc = vec2<u32>(0u, 0u);
    for (var t = 0u; t < params.num_tables; t = t + 1u) {
        let a_word = a[row * params.words_per_row_a + t / chunks_per_word];
        // k divides 32, so a chunk never straddles the two halves
        let shift = (t % chunks_per_word) * k;
        var a_half = a_word.x;
        if (shift >= 32u) {
            a_half = a_word.y;
        }
        let v = (a_half >> (shift % 32u)) & mask;
        acc = acc ^ lookup[((t << k) + v) * params.words_per_row_b + word];
    }
    c[row * params.words_per_row_result + word] = acc;
}
"#;

/// Complete WGSL source for a kernel
pub fn source(kernel: KernelId) -> String {
    let body = match kernel {
        KernelId::Naive => NAIVE_SHADER,
        KernelId::Transposed => TRANSPOSED_SHADER,
        KernelId::Tiled => TILED_SHADER,
        KernelId::Vectorized => VECTORIZED_SHADER,
        KernelId::M4rBuild => M4R_BUILD_SHADER,
        KernelId::M4rMultiply => M4R_MULTIPLY_SHADER,
    };
    format!("{PARAMS_STRUCT}{body}")
}
