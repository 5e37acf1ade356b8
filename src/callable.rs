//! Fixed-capacity, type-erased callable.
//!
//! [`BoundedFn`] stores a closure inline, in a buffer of
//! [`INLINE_CAPACITY`] bytes, together with a small table of function
//! pointers captured from the concrete closure type. It never allocates.
//!
//! The capacity is part of the contract: a closure that does not fit is
//! rejected when the program is compiled.
//!
//! Every component stores its callbacks through one of two traits:
//! [`Invoke`] for callbacks run repeatedly (reactor registrations) and
//! [`InvokeOnce`] for callbacks run once (pool jobs, scheduled entries).
//! Both are implemented for [`BoundedFn`] and for boxed closures, which are
//! the default storage.
//!
//! ```rust,compile_fail
//! let big = [0u8; 64];
//! let _ = treadle::BoundedFn::new(move || {
//!     let _ = big.len();
//! });
//! ```

use crate::error::EmptyCallableError;

use log::warn;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr;

/// Default storage for repeatable callbacks.
pub type BoxedFn = Box<dyn FnMut() + Send>;

/// Default storage for one-shot callbacks.
pub type BoxedFnOnce = Box<dyn FnOnce() + Send>;

/// Callback storage invoked any number of times.
pub trait Invoke: Send + 'static {
    fn invoke(&mut self);
}

/// Callback storage invoked at most once, then dropped.
pub trait InvokeOnce: Send + 'static {
    fn invoke_once(self);
}

impl Invoke for BoxedFn {
    fn invoke(&mut self) {
        (**self)()
    }
}

impl InvokeOnce for BoxedFnOnce {
    fn invoke_once(self) {
        self()
    }
}

/// Number of bytes available for the stored closure.
pub const INLINE_CAPACITY: usize = 32;

/// Inline buffer holding the erased closure.
#[repr(C, align(16))]
struct Storage([MaybeUninit<u8>; INLINE_CAPACITY]);

impl Storage {
    const fn uninit() -> Self {
        Self([MaybeUninit::uninit(); INLINE_CAPACITY])
    }

    fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr().cast()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr().cast()
    }
}

/// Operations captured from the concrete closure type at construction.
#[derive(Clone, Copy)]
struct VTable {
    call: unsafe fn(*mut u8),
    clone: unsafe fn(*const u8, *mut u8),
    drop: unsafe fn(*mut u8),
}

impl VTable {
    fn of<F>() -> Self
    where
        F: FnMut() + Clone + Send + 'static,
    {
        Self {
            call: call_erased::<F>,
            clone: clone_erased::<F>,
            drop: drop_erased::<F>,
        }
    }
}

unsafe fn call_erased<F: FnMut()>(object: *mut u8) {
    unsafe { (*object.cast::<F>())() }
}

unsafe fn clone_erased<F: Clone>(source: *const u8, target: *mut u8) {
    unsafe {
        let copy = (*source.cast::<F>()).clone();
        ptr::write(target.cast::<F>(), copy);
    }
}

unsafe fn drop_erased<F>(object: *mut u8) {
    unsafe { ptr::drop_in_place(object.cast::<F>()) }
}

/// A `FnMut()` stored in place, without heap allocation.
///
/// A `BoundedFn` is either empty or holds exactly one closure. Cloning
/// clones the stored closure; moving is a plain bitwise move.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use treadle::BoundedFn;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = hits.clone();
///
/// let mut f = BoundedFn::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// f.call().unwrap();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct BoundedFn {
    storage: Storage,
    vtable: Option<VTable>,

    // Cloning goes through `&F`, which is only sound from one thread at a time.
    _not_sync: PhantomData<Cell<()>>,
}

impl BoundedFn {
    /// Stores `f` inline.
    ///
    /// Fails to compile if `F` is larger than [`INLINE_CAPACITY`] bytes or
    /// needs more than 16-byte alignment.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() + Clone + Send + 'static,
    {
        const {
            assert!(
                mem::size_of::<F>() <= INLINE_CAPACITY,
                "closure does not fit in BoundedFn inline storage"
            );
            assert!(
                mem::align_of::<F>() <= mem::align_of::<Storage>(),
                "closure alignment exceeds BoundedFn inline storage"
            );
        }

        let mut storage = Storage::uninit();
        unsafe { ptr::write(storage.as_mut_ptr().cast::<F>(), f) };

        Self {
            storage,
            vtable: Some(VTable::of::<F>()),
            _not_sync: PhantomData,
        }
    }

    /// Creates an empty callable.
    pub const fn empty() -> Self {
        Self {
            storage: Storage::uninit(),
            vtable: None,
            _not_sync: PhantomData,
        }
    }

    /// Returns `true` if no closure is stored.
    pub fn is_empty(&self) -> bool {
        self.vtable.is_none()
    }

    /// Invokes the stored closure.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyCallableError`] if the callable is empty.
    pub fn call(&mut self) -> Result<(), EmptyCallableError> {
        match self.vtable {
            Some(vtable) => {
                unsafe { (vtable.call)(self.storage.as_mut_ptr()) };
                Ok(())
            }
            None => Err(EmptyCallableError),
        }
    }

    /// Moves the stored closure out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Drops the stored closure, if any.
    pub fn clear(&mut self) {
        if let Some(vtable) = self.vtable.take() {
            unsafe { (vtable.drop)(self.storage.as_mut_ptr()) };
        }
    }
}

impl Clone for BoundedFn {
    fn clone(&self) -> Self {
        let Some(vtable) = self.vtable else {
            return Self::empty();
        };

        let mut storage = Storage::uninit();
        unsafe { (vtable.clone)(self.storage.as_ptr(), storage.as_mut_ptr()) };

        Self {
            storage,
            vtable: Some(vtable),
            _not_sync: PhantomData,
        }
    }
}

impl Default for BoundedFn {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for BoundedFn {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for BoundedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedFn")
            .field("empty", &self.is_empty())
            .finish()
    }
}

impl Invoke for BoundedFn {
    /// Runs the stored closure; an empty callable is skipped with a warning.
    fn invoke(&mut self) {
        if self.call().is_err() {
            warn!("skipped an empty BoundedFn");
        }
    }
}

impl InvokeOnce for BoundedFn {
    fn invoke_once(mut self) {
        Invoke::invoke(&mut self);
    }
}
