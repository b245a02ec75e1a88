//! Memoization keys.
//!
//! A key identifies one memo entry: the function name, the argument and
//! output types, and the argument value itself. The argument value is
//! stored type-erased so entries of unrelated types share one table.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe view of a memoized function's argument value.
///
/// Implemented for every `Hash + Eq + Debug + Send + Sync + 'static` type.
/// Tuples make argument order significant.
pub trait MemoArgs: Any + Debug + Send + Sync {
    /// Get the arguments as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Compare with arguments of possibly another type.
    fn args_eq(&self, other: &dyn Any) -> bool;
}

impl<A> MemoArgs for A
where
    A: Hash + Eq + Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn args_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<A>().is_some_and(|other| self == other)
    }
}

/// Cache key of a memo entry.
#[derive(Clone)]
pub struct MemoKey {
    name: &'static str,
    args_type: TypeId,
    output_type: TypeId,
    args: Arc<dyn MemoArgs>,
    /// Computed once, since keys are hashed on every lookup.
    hash: u64,
}

impl MemoKey {
    /// Build the key for `name` called with `args`, producing a `T`.
    pub fn new<A, T>(name: &'static str, args: Arc<A>) -> Self
    where
        A: Hash + Eq + Debug + Send + Sync + 'static,
        T: 'static,
    {
        let args_type = TypeId::of::<A>();
        let output_type = TypeId::of::<T>();

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        args_type.hash(&mut hasher);
        output_type.hash(&mut hasher);
        args.hash(&mut hasher);

        Self {
            name,
            args_type,
            output_type,
            args,
            hash: hasher.finish(),
        }
    }

    /// The function name this key was built for.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Downcast the arguments to their original type.
    pub fn args<A: 'static>(&self) -> Option<&A> {
        (*self.args).as_any().downcast_ref()
    }
}

impl Hash for MemoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for MemoKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.name == other.name
            && self.args_type == other.args_type
            && self.output_type == other.output_type
            && (*self.args).args_eq((*other.args).as_any())
    }
}

impl Eq for MemoKey {}

impl Debug for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:?}", self.name, self.args)
    }
}

impl fmt::Display for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}
