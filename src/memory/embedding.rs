//! 向量化：文本 → 固定维度向量
//!
//! 检索引擎只依赖 Embedder trait；默认实现 HashEmbedder 为确定性的特征哈希
//! （无训练、无外部模型），以后可替换为真实嵌入模型而不影响融合/排序逻辑。

use crate::memory::tokenizer;

/// 嵌入提供方：同一实现既用于写入记录，也用于查询，保证两侧向量可比
pub trait Embedder: Send + Sync {
    /// 输出向量维度
    fn dimensions(&self) -> usize;

    /// 将文本编码为长度为 dimensions() 的向量；空文本返回全零向量
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// 特征哈希嵌入：每个归一化词经 FNV-1a 映射到一个维度，并按哈希高位决定正负号累加，
/// 最后做 L2 归一化
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 384;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn fnv1a(term: &str) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    /// (维度下标, 符号)
    fn bucket(&self, term: &str) -> (usize, f32) {
        let h = Self::fnv1a(term);
        let index = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenizer::tokenize(text) {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// 平方欧氏距离；长度不同按较短者计算（调用方保证维度一致）
pub fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum()
}

/// 距离 → 相似度：1 / (1 + d)，单调递减、落在 (0, 1]，d ≥ 0 时不会除零
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}
