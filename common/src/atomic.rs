use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};

/// Relaxed-ordering sugar for plain status flags and counters.
///
/// All the flags in this crate are independent state markers (running,
/// connected, closed), never used to publish other memory, so relaxed
/// loads and stores are sufficient.
pub trait EasyAtomic {
    type Item;

    /// Get atomic value.
    fn get(&self) -> Self::Item;

    /// Store a new value.
    fn set(&self, value: Self::Item);

    /// Swap in a new value, returning the previous one.
    fn update(&self, value: Self::Item) -> Self::Item;
}

macro_rules! easy_atomic {
    ($typed:ty, $item:ty) => {
        impl EasyAtomic for $typed {
            type Item = $item;

            fn get(&self) -> Self::Item {
                self.load(Ordering::Relaxed)
            }

            fn set(&self, value: Self::Item) {
                self.store(value, Ordering::Relaxed)
            }

            fn update(&self, value: Self::Item) -> Self::Item {
                self.swap(value, Ordering::Relaxed)
            }
        }
    };
}

easy_atomic!(AtomicBool, bool);
easy_atomic!(AtomicI32, i32);
easy_atomic!(AtomicU32, u32);
easy_atomic!(AtomicI64, i64);
easy_atomic!(AtomicU64, u64);
easy_atomic!(AtomicUsize, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_returns_previous_value() {
        let flag = AtomicBool::new(true);
        assert!(EasyAtomic::update(&flag, false));
        assert!(!EasyAtomic::update(&flag, false));
        assert!(!flag.get());

        flag.set(true);
        assert!(flag.get());
    }
}
