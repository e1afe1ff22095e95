//! Mutation ID 生成
//!
//! 格式：`{wall_clock_millis}-{counter}`，计数器为进程级单调递增，
//! 保证同一进程内永不重复；毫秒时间部分避免重启后与旧 ID 碰撞。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 进程级计数器
static GLOBAL_GENERATOR: MutationIdGenerator = MutationIdGenerator::new();

/// 乐观更新的唯一标识，registry 的唯一键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(String);

impl MutationId {
    /// 生成一个新的 ID
    pub fn generate() -> Self {
        GLOBAL_GENERATOR.next_id()
    }

    /// 使用调用方自己的 ID（调用方负责唯一性）
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// ID 生成器
#[derive(Debug)]
pub struct MutationIdGenerator {
    counter: AtomicU64,
}

impl MutationIdGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> MutationId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = Utc::now().timestamp_millis();
        MutationId(format!("{}-{}", millis, seq))
    }

    /// 已发出的 ID 数量
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for MutationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<MutationId> = (0..10_000).map(|_| MutationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_generator_counts_issued_ids() {
        let generator = MutationIdGenerator::new();
        let first = generator.next_id();
        let second = generator.next_id();
        assert_ne!(first, second);
        assert_eq!(generator.issued(), 2);
        assert!(first.as_str().ends_with("-1"));
        assert!(second.as_str().ends_with("-2"));
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..500).map(|_| MutationId::generate()).collect::<Vec<_>>()))
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 4000);
    }
}
