//! The uniform execute contract every registered algorithm satisfies.
//!
//! Two shapes are accepted: an object implementing [`Algorithm`], or a plain
//! callable wrapped with [`AlgorithmInstance::callable`]. Both are captured by
//! the closed [`AlgorithmInstance`] enum, so there is no runtime shape check.
//!
//! Instances are shared: the loader hands the same instance to every
//! concurrent task for a given algorithm id, so implementations must be
//! `Send + Sync` and keep any mutable state behind interior mutability.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AlgorithmError;

/// An algorithm object exposing an async `execute` capability.
#[async_trait]
pub trait Algorithm: Send + Sync {
    /// Run the algorithm against a payload, producing a new payload.
    async fn execute(&self, payload: Value) -> Result<Value, AlgorithmError>;
}

/// Signature of a plain synchronous callable algorithm.
pub type CallableFn = dyn Fn(Value) -> Result<Value, AlgorithmError> + Send + Sync;

/// A loaded algorithm, in either of the two supported shapes.
#[derive(Clone)]
pub enum AlgorithmInstance {
    Executable(Arc<dyn Algorithm>),
    Callable(Arc<CallableFn>),
}

impl AlgorithmInstance {
    pub fn executable<A>(algorithm: A) -> Self
    where
        A: Algorithm + 'static,
    {
        Self::Executable(Arc::new(algorithm))
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, AlgorithmError> + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(f))
    }

    /// Invoke the instance with `payload`.
    pub async fn execute(&self, payload: Value) -> Result<Value, AlgorithmError> {
        match self {
            Self::Executable(algorithm) => algorithm.execute(payload).await,
            Self::Callable(f) => f(payload),
        }
    }

    /// Whether both handles point at the same live instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Executable(a), Self::Executable(b)) => Arc::ptr_eq(a, b),
            (Self::Callable(a), Self::Callable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Executable(_) => "executable",
            Self::Callable(_) => "callable",
        }
    }
}

impl fmt::Debug for AlgorithmInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmInstance")
            .field("shape", &self.shape())
            .finish()
    }
}

/// Zero-argument constructor producing a fresh instance.
pub type AlgorithmFactory =
    Arc<dyn Fn() -> Result<AlgorithmInstance, AlgorithmError> + Send + Sync>;

/// Box a closure as an [`AlgorithmFactory`].
pub fn factory<F>(f: F) -> AlgorithmFactory
where
    F: Fn() -> Result<AlgorithmInstance, AlgorithmError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Increment;

    #[async_trait]
    impl Algorithm for Increment {
        async fn execute(&self, payload: Value) -> Result<Value, AlgorithmError> {
            let n = payload
                .as_i64()
                .ok_or_else(|| AlgorithmError::InvalidInput("expected integer".into()))?;
            Ok(json!(n + 1))
        }
    }

    #[tokio::test]
    async fn executable_shape_runs() {
        let inst = AlgorithmInstance::executable(Increment);
        assert_eq!(inst.execute(json!(41)).await.unwrap(), json!(42));
        assert!(inst.execute(json!("nope")).await.is_err());
    }

    #[tokio::test]
    async fn callable_shape_runs() {
        let inst = AlgorithmInstance::callable(|v| Ok(json!({ "echo": v })));
        assert_eq!(inst.execute(json!(1)).await.unwrap(), json!({ "echo": 1 }));
    }

    #[test]
    fn same_instance_tracks_identity() {
        let a = AlgorithmInstance::executable(Increment);
        let b = a.clone();
        let c = AlgorithmInstance::executable(Increment);
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
        assert!(!a.same_instance(&AlgorithmInstance::callable(|v| Ok(v))));
    }

    #[test]
    fn factory_builds_new_instances() {
        let f = factory(|| Ok(AlgorithmInstance::executable(Increment)));
        let first = f().unwrap();
        let second = f().unwrap();
        assert!(!first.same_instance(&second));
        assert_eq!(format!("{:?}", first), "AlgorithmInstance { shape: \"executable\" }");
    }
}
