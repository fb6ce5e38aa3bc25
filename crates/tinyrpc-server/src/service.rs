//! Service registration.
//!
//! A [`Service`] is a named receiver value plus a table of methods. Each
//! method is a function `Fn(&T, Args, &mut Reply) -> anyhow::Result<()>`
//! where `Args` is decoded from the request body and `Reply` starts out as
//! `Reply::default()`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tinyrpc_common::protocol::error::{Result, RpcError};
use tinyrpc_common::transport::CodecType;

/// A decoded request, ready to run: produces the encoded reply body or the
/// error text for the response header.
pub type Invocation = Box<dyn FnOnce() -> std::result::Result<Vec<u8>, String> + Send>;

type NewRequestFn = dyn Fn(CodecType, &[u8]) -> Result<Invocation> + Send + Sync;

/// One registered method.
pub struct MethodType {
    name: String,
    num_calls: AtomicU64,
    new_request: Box<NewRequestFn>,
}

impl MethodType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times the method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decodes a fresh argument value from `body`.
    ///
    /// The returned invocation creates a fresh reply value when it runs.
    pub fn new_request(&self, codec_type: CodecType, body: &[u8]) -> Result<Invocation> {
        (self.new_request)(codec_type, body)
    }

    pub(crate) fn record_call(&self) {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}

/// A named set of methods ready for [`Server::register`](crate::Server::register).
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Starts a service named after the receiver's type.
    ///
    /// # Example
    ///
    /// ```
    /// use serde::Deserialize;
    /// use tinyrpc_server::Service;
    ///
    /// struct Foo;
    ///
    /// #[derive(Deserialize)]
    /// struct Args {
    ///     num1: i64,
    ///     num2: i64,
    /// }
    ///
    /// let service = Service::builder(Foo)
    ///     .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
    ///         *reply = args.num1 + args.num2;
    ///         Ok(())
    ///     })
    ///     .unwrap()
    ///     .build();
    ///
    /// assert_eq!(service.name(), "Foo");
    /// assert!(service.method("Sum").is_some());
    /// ```
    pub fn builder<T>(receiver: T) -> ServiceBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        ServiceBuilder {
            name: type_name_of::<T>(),
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }

    /// Registered methods, sorted by name.
    pub fn methods(&self) -> Vec<Arc<MethodType>> {
        let mut methods: Vec<_> = self.methods.values().cloned().collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        methods
    }
}

/// Builder collecting the methods of one receiver.
pub struct ServiceBuilder<T> {
    name: String,
    receiver: Arc<T>,
    methods: HashMap<String, Arc<MethodType>>,
}

impl<T> ServiceBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Overrides the service name derived from the receiver type.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a method.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty, contains `.`, or is already taken.
    pub fn method<A, R, F>(mut self, name: &str, f: F) -> Result<Self>
    where
        A: DeserializeOwned + Send + 'static,
        R: Default + Serialize + 'static,
        F: Fn(&T, A, &mut R) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        validate_name(name).map_err(|reason| {
            RpcError::InvalidService(format!("method {} {}", name, reason))
        })?;
        if self.methods.contains_key(name) {
            return Err(RpcError::InvalidService(format!(
                "method already defined: {}.{}",
                self.name, name
            )));
        }

        let receiver = Arc::clone(&self.receiver);
        let f = Arc::new(f);
        let new_request = move |codec_type: CodecType, body: &[u8]| -> Result<Invocation> {
            let args: A = codec_type.decode(body).map_err(|e| {
                RpcError::InvalidService(format!("read body err: {}", e))
            })?;
            let receiver = Arc::clone(&receiver);
            let f = Arc::clone(&f);
            let invocation: Invocation = Box::new(move || {
                let mut reply = R::default();
                (*f)(&*receiver, args, &mut reply).map_err(|e| e.to_string())?;
                codec_type.encode(&reply).map_err(|e| e.to_string())
            });
            Ok(invocation)
        };

        self.methods.insert(
            name.to_string(),
            Arc::new(MethodType {
                name: name.to_string(),
                num_calls: AtomicU64::new(0),
                new_request: Box::new(new_request),
            }),
        );
        Ok(self)
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

pub(crate) fn validate_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("has an empty name");
    }
    if name.contains('.') {
        return Err("must not contain '.'");
    }
    Ok(())
}

/// Last path segment of `T`'s type name, without generic arguments.
fn type_name_of<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
