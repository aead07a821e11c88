//! 分词与归一化
//!
//! 向量化与关键词重叠共用同一套归一化规则：小写、按非字母数字切分、去英文停用词、
//! 丢弃单字符词；包含 CJK 字符时使用 jieba-rs 分词（CJK 单字保留）。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// 英文停用词：不参与检索打分
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "did", "do", "does",
    "for", "from", "has", "have", "i", "in", "into", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "so", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "to", "us", "was", "we", "were", "what", "when", "where", "which", "who",
    "why", "will", "with", "you", "your",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

fn keep(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (None, _) => false,
        (Some(c), None) => is_cjk(c),
        _ => !is_stop_word(token),
    }
}

/// 归一化分词：返回按出现顺序排列的词（可重复，供向量化计频）
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let lower = text.to_lowercase();
    let pieces: Vec<String> = if contains_cjk(&lower) {
        // 搜索引擎模式，粒度更细
        get_jieba()
            .cut_for_search(&lower, true)
            .into_iter()
            .flat_map(|s| split_alphanumeric(s).into_iter())
            .collect()
    } else {
        split_alphanumeric(&lower)
    };

    pieces.into_iter().filter(|t| keep(t)).collect()
}

fn split_alphanumeric(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 分词并返回词集合
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// 关键词重叠：|query ∩ doc| / |query|；query 为空时为 0
pub fn keyword_overlap(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let intersection = query.intersection(doc).count() as f64;
    intersection / query.len() as f64
}
