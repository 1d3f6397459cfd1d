//! Invoking named transactions
//!
//! A call is either a plain value, committed at once, or an argument
//! provider:
//! - a closure or future resolving to the arguments, committed when ready
//! - a stream of [`ArgsStep`]s; each `Transient` step is applied
//!   provisionally and the call ends with a commit of the last value
//!
//! All envelopes of one call share a transaction id. If a provider fails
//! after something was applied provisionally, the call is cancelled before
//! the error is returned.

use crate::database::Database;
use crate::error::Result;
use crate::reconcile::TransactionEnvelope;
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use void_ecs::Value;
use void_ir::TransactionId;

/// One value produced by a streaming provider
#[derive(Debug, Clone, PartialEq)]
pub enum ArgsStep {
    /// Apply provisionally, superseding the previous step
    Transient(Value),
    /// Commit and end the call
    Commit(Value),
}

/// Where the arguments of a call come from
pub enum ArgsProvider {
    Value(Value),
    Fn(Box<dyn FnOnce() -> Result<Value> + Send>),
    Future(BoxFuture<'static, Result<Value>>),
    Stream(BoxStream<'static, Result<ArgsStep>>),
}

impl ArgsProvider {
    pub fn from_fn(f: impl FnOnce() -> Result<Value> + Send + 'static) -> Self {
        Self::Fn(Box::new(f))
    }

    pub fn from_future(future: impl Future<Output = Result<Value>> + Send + 'static) -> Self {
        Self::Future(Box::pin(future))
    }

    pub fn from_stream(stream: impl Stream<Item = Result<ArgsStep>> + Send + 'static) -> Self {
        Self::Stream(stream.boxed())
    }
}

impl From<Value> for ArgsProvider {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for ArgsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Fn(_) => f.write_str("Fn"),
            Self::Future(_) => f.write_str("Future"),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl Database {
    /// Commit a named transaction with `args`
    pub fn transact(&self, name: &str, args: impl Into<Value>) -> Result<Value> {
        let id = self.next_transaction_id();
        self.commit(id, name, args.into())
    }

    /// Invoke a named transaction with arguments from a provider
    pub async fn transact_with(&self, name: &str, provider: ArgsProvider) -> Result<Value> {
        let id = self.next_transaction_id();
        match provider {
            ArgsProvider::Value(args) => self.commit(id, name, args),
            ArgsProvider::Fn(f) => {
                let args = f()?;
                self.commit(id, name, args)
            }
            ArgsProvider::Future(future) => {
                let args = future.await?;
                self.commit(id, name, args)
            }
            ArgsProvider::Stream(stream) => self.run_stream(id, name, stream).await,
        }
    }

    async fn run_stream(&self, id: TransactionId, name: &str, mut stream: BoxStream<'static, Result<ArgsStep>>) -> Result<Value> {
        let mut last: Option<Value> = None;
        while let Some(step) = stream.next().await {
            match step {
                Ok(ArgsStep::Transient(args)) => {
                    let envelope = TransactionEnvelope::transient(id, name, args.clone(), self.now());
                    if let Err(error) = self.apply_envelope(&envelope) {
                        self.cancel(id, name);
                        return Err(error);
                    }
                    last = Some(args);
                }
                Ok(ArgsStep::Commit(args)) => return self.commit(id, name, args),
                Err(error) => {
                    self.cancel(id, name);
                    return Err(error);
                }
            }
        }

        match last {
            Some(args) => self.commit(id, name, args),
            None => {
                log::debug!("Provider for '{}' ended without a value", name);
                self.cancel(id, name);
                Ok(Value::Null)
            }
        }
    }

    fn commit(&self, id: TransactionId, name: &str, args: Value) -> Result<Value> {
        let envelope = TransactionEnvelope::commit(id, name, args, self.now());
        Ok(self.apply_envelope(&envelope)?.unwrap_or_default())
    }

    fn cancel(&self, id: TransactionId, name: &str) {
        let envelope = TransactionEnvelope::cancel(id, name);
        if let Err(error) = self.apply_envelope(&envelope) {
            log::error!("Cancelling '{}' failed: {}", name, error);
        }
    }
}
