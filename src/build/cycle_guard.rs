use ahash::{AHashMap, AHashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCheck {
    /// Safe to compile the target.
    Unlocked,
    /// The unit references itself.
    SelfReference,
    /// The target is already being compiled; the chain ends with the target.
    Cycle(Vec<PathBuf>),
}

impl LockCheck {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, LockCheck::Unlocked)
    }
}

/// In-flight "compiling `to` on behalf of `from`" edges, one per target.
#[derive(Debug, Default)]
pub struct CycleGuard {
    locks: AHashMap<PathBuf, PathBuf>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, from: &Path, to: &Path) -> LockCheck {
        if from == to {
            return LockCheck::SelfReference;
        }
        let to_in_flight = self.locks.contains_key(to) || self.locks.values().any(|value| value == to);
        if !to_in_flight {
            return LockCheck::Unlocked;
        }

        let mut chain = vec![];
        let mut seen = AHashSet::new();
        let mut current = Some(from.to_path_buf());
        while let Some(path) = current {
            if !seen.insert(path.clone()) {
                break;
            }
            current = self.locks.get(&path).cloned();
            chain.push(path);
        }
        chain.reverse();
        chain.push(to.to_path_buf());
        LockCheck::Cycle(chain)
    }

    pub fn lock(&mut self, from: &Path, to: &Path) {
        self.locks.insert(to.to_path_buf(), from.to_path_buf());
    }

    pub fn unlock(&mut self, to: &Path) {
        self.locks.remove(to);
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn p(name: &str) -> PathBuf {
        PathBuf::from(format!("/project/{name}"))
    }

    #[test]
    fn self_reference_is_always_reported() {
        let guard = CycleGuard::new();
        assert_eq!(guard.check(&p("a.html"), &p("a.html")), LockCheck::SelfReference);
    }

    #[test]
    fn locked_target_reports_chain_ending_in_target() {
        let mut guard = CycleGuard::new();
        assert!(guard.check(&p("a"), &p("b")).is_unlocked());
        guard.lock(&p("a"), &p("b"));

        match guard.check(&p("c"), &p("b")) {
            LockCheck::Cycle(chain) => {
                assert!(!chain.is_empty());
                assert_eq!(chain.last(), Some(&p("b")));
            }
            other => panic!("expected cycle, got {other:?}"),
        }

        guard.unlock(&p("b"));
        assert!(guard.check(&p("c"), &p("b")).is_unlocked());
        assert!(guard.is_empty());
    }

    #[test]
    fn target_compiling_something_else_closes_the_loop() {
        let mut guard = CycleGuard::new();
        guard.lock(&p("x"), &p("y"));
        assert_eq!(
            guard.check(&p("y"), &p("x")),
            LockCheck::Cycle(vec![p("x"), p("y"), p("x")])
        );
    }

    #[test]
    fn chain_walks_back_through_every_lock() {
        let mut guard = CycleGuard::new();
        guard.lock(&p("a"), &p("b"));
        guard.lock(&p("b"), &p("c"));
        assert_eq!(
            guard.check(&p("c"), &p("a")),
            LockCheck::Cycle(vec![p("a"), p("b"), p("c"), p("a")])
        );
        guard.clear();
        assert!(guard.check(&p("c"), &p("a")).is_unlocked());
    }
}
