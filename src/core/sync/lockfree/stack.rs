/*!
 * Lock-Free Stack
 *
 * Treiber stack: a singly-linked LIFO whose only shared state is the
 * top-of-stack pointer. Every push and pop linearizes at one CAS on `top`.
 *
 * # Reclamation
 *
 * A popped node may still be read by a thread that loaded it as `top` just
 * before the winning CAS. Freeing it right away would be a use-after-free,
 * and letting the allocator hand the same address back to a later push
 * would make the loser's stale CAS succeed (ABA on node pointers).
 *
 * Nodes are therefore retired through crossbeam-epoch: a popped node is only
 * freed after every thread that was pinned when it was unlinked has unpinned.
 * While a thread holds its guard, no address it has loaded can be reused.
 *
 * # Progress
 *
 * Lock-free, not wait-free: a lost CAS means some other operation landed.
 * Losers back off (spin, then yield) before re-reading `top`.
 */

use super::striped_counter::StripedCounter;
use crate::core::errors::PushError;
use crate::core::sync::backoff::Backoff;
use crate::core::sync::config::BackoffConfig;
use crossbeam_epoch::{self as epoch, Atomic, Owned};
use std::alloc::{self, Layout};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;
use tracing::warn;

/// Stack node; owned by the stack while linked
struct Node<T> {
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    /// Heap-allocate a node, reporting allocator failure instead of aborting
    fn try_alloc(value: T) -> Result<Owned<Node<T>>, PushError<T>> {
        let layout = Layout::new::<Node<T>>();

        // Safety: Node<T> always holds a pointer, so the layout is non-zero
        let raw = unsafe { alloc::alloc(layout) } as *mut Node<T>;
        if raw.is_null() {
            warn!(size = layout.size(), "stack node allocation failed");
            return Err(PushError::AllocationFailed {
                value,
                size: layout.size(),
            });
        }

        // Safety: raw is a fresh allocation with Node<T>'s layout from the
        // global allocator, which is what Box expects to own
        unsafe {
            raw.write(Node {
                value: ManuallyDrop::new(value),
                next: Atomic::null(),
            });
            Ok(Owned::from(Box::from_raw(raw)))
        }
    }
}

/// Treiber lock-free stack with epoch-based node reclamation
///
/// Usable with any number of producers and consumers.
///
/// # Example
///
/// ```
/// use lockfree_prims::core::sync::LockFreeStack;
///
/// let stack = LockFreeStack::new();
/// stack.push(1).unwrap();
/// stack.push(2).unwrap();
///
/// assert_eq!(stack.peek(), Some(2));
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct LockFreeStack<T> {
    top: Atomic<Node<T>>,
    backoff: BackoffConfig,
    /// Failed CAS attempts, for contention diagnostics
    contention: StripedCounter,
}

impl<T> LockFreeStack<T> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::with_backoff(BackoffConfig::default())
    }

    /// Create an empty stack with custom retry backoff
    pub fn with_backoff(backoff: BackoffConfig) -> Self {
        Self {
            top: Atomic::null(),
            backoff: backoff.clamped(),
            contention: StripedCounter::new(),
        }
    }

    /// Push a value on top of the stack
    ///
    /// Only fails if the node cannot be allocated, in which case the value
    /// is returned inside the error.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut node = Node::try_alloc(value)?;
        let backoff = Backoff::with_config(self.backoff);
        let guard = epoch::pin();

        loop {
            let top = self.top.load(Ordering::Relaxed, &guard);
            node.next.store(top, Ordering::Relaxed);

            match self.top.compare_exchange(
                top,
                node,
                Ordering::Release,
                Ordering::Relaxed,
                &guard,
            ) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    node = e.new;
                    self.contention.increment();
                    backoff.snooze();
                }
            }
        }
    }

    /// Pop the top value, or `None` if the stack is empty
    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::with_config(self.backoff);
        let guard = epoch::pin();

        loop {
            let top = self.top.load(Ordering::Acquire, &guard);

            // Safety: top is either null or a node kept alive by the guard
            let node = unsafe { top.as_ref() }?;
            let next = node.next.load(Ordering::Relaxed, &guard);

            if self
                .top
                .compare_exchange(top, next, Ordering::Relaxed, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // Safety: the CAS unlinked the node, so this thread alone
                // moves the value out; the node memory is freed later
                // without dropping the value again (ManuallyDrop)
                unsafe {
                    guard.defer_destroy(top);
                    return Some(ManuallyDrop::into_inner(ptr::read(&node.value)));
                }
            }

            self.contention.increment();
            backoff.snooze();
        }
    }

    /// True if the stack has no nodes at the time of the read
    #[inline]
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.top.load(Ordering::Acquire, &guard).is_null()
    }

    /// Number of CAS attempts lost to other threads so far
    ///
    /// Approximate while operations are in flight.
    #[inline]
    pub fn contention(&self) -> i64 {
        self.contention.sum()
    }
}

impl<T: Copy> LockFreeStack<T> {
    /// Copy of the top value without removing it
    ///
    /// Stale as soon as it returns if other threads are mutating the stack;
    /// fine for diagnostics, not for deciding whether to pop.
    ///
    /// Limited to `Copy` values: a concurrent pop moves the value out and
    /// may drop it while this read is still in progress.
    pub fn peek(&self) -> Option<T> {
        let guard = epoch::pin();
        let top = self.top.load(Ordering::Acquire, &guard);
        // Safety: top is either null or a node kept alive by the guard;
        // copying a `Copy` value cannot observe freed resources
        unsafe { top.as_ref() }.map(|node| *node.value)
    }
}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LockFreeStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeStack")
            .field("is_empty", &self.is_empty())
            .field("contention", &self.contention())
            .finish()
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        // Safety: &mut self means no other thread can reach the nodes
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.top.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let mut owned = current.into_owned();
                current = owned.next.load(Ordering::Relaxed, guard);
                ManuallyDrop::drop(&mut owned.value);
            }
        }
    }
}

// Safety: values move between threads through push/pop; peek only copies
// `Copy` values, so no shared reference to a value escapes
unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_lifo_order() {
        let stack = LockFreeStack::new();
        for i in 0..100 {
            stack.push(i).unwrap();
        }

        for i in (0..100).rev() {
            assert_eq!(stack.pop(), Some(i));
        }
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_peek_does_not_remove() {
        let stack = LockFreeStack::new();
        assert_eq!(stack.peek(), None);

        stack.push(7u64).unwrap();
        stack.push(8u64).unwrap();
        assert_eq!(stack.peek(), Some(8));
        assert_eq!(stack.peek(), Some(8));
        assert_eq!(stack.pop(), Some(8));
        assert_eq!(stack.peek(), Some(7));
        assert!(!stack.is_empty());
    }

    #[test]
    fn test_single_thread_has_no_contention() {
        let stack = LockFreeStack::new();
        for i in 0..1000 {
            stack.push(i).unwrap();
        }
        while stack.pop().is_some() {}
        assert_eq!(stack.contention(), 0);
    }

    #[derive(Debug)]
    struct DropTracker(Arc<AtomicUsize>);

    impl Drop for DropTracker {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_releases_remaining_values() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let stack = LockFreeStack::new();
            for _ in 0..10 {
                stack.push(DropTracker(drops.clone())).unwrap();
            }
            // Popped value dropped here, exactly once
            drop(stack.pop());
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_concurrent_push_pop_no_duplicates() {
        const THREADS: usize = 8;
        const OPS: usize = 2000;

        let stack = Arc::new(LockFreeStack::new());
        let barrier = Arc::new(Barrier::new(THREADS));
        let mut handles = vec![];

        for t in 0..THREADS {
            let stack = stack.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut popped = Vec::with_capacity(OPS);
                for i in 0..OPS {
                    stack.push((t, i)).unwrap();
                    if let Some(v) = stack.pop() {
                        popped.push(v);
                    }
                }
                popped
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for v in handle.join().unwrap() {
                assert!(seen.insert(v), "value {:?} popped twice", v);
            }
        }
        while let Some(v) = stack.pop() {
            assert!(seen.insert(v), "value {:?} popped twice", v);
        }

        assert_eq!(seen.len(), THREADS * OPS);
        assert!(stack.is_empty());
    }
}
