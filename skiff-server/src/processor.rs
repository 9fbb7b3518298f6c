//! Method registry and server-side dispatch.
//!
//! A [`Processor`] maps method names to typed handlers. Handlers are
//! registered once through [`ProcessorBuilder`] and resolved by name for
//! every incoming CALL or ONEWAY message.

use crate::stats::MethodStats;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use skiff_protocol::message::encode_message;
use skiff_protocol::{
    read_envelope, ApplicationException, CodecError, CodecOptions, DecodeError, Decoder,
    Encoder, MessageHeader, MessageType, ProtocolError, StructDescriptor, StructValue,
    ThriftStruct, TType,
};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Type-erased result body written after a REPLY envelope.
trait ReplyBody: Send {
    fn write_body(&self, enc: &mut Encoder) -> Result<(), CodecError>;
}

impl<T: ThriftStruct + Send> ReplyBody for T {
    fn write_body(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        self.write(enc)
    }
}

type HandlerFuture = BoxFuture<'static, Result<Box<dyn ReplyBody>, ApplicationException>>;

/// Decodes arguments from the payload and starts the handler.
type Invoke = Box<dyn Fn(&mut Decoder) -> Result<HandlerFuture, CodecError> + Send + Sync>;

struct Method {
    oneway: bool,
    invoke: Invoke,
}

/// Result struct of a oneway method invoked with a CALL message.
struct EmptyResult;

impl ThriftStruct for EmptyResult {
    fn descriptor() -> &'static StructDescriptor {
        static DESC: OnceLock<StructDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            StructDescriptor::builder("EmptyResult")
                .build()
                .expect("static schema")
        })
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new()
    }

    fn from_struct_value(_value: StructValue) -> Result<Self, DecodeError> {
        Ok(EmptyResult)
    }
}

/// Registers handlers and builds a [`Processor`].
pub struct ProcessorBuilder {
    methods: HashMap<String, Method>,
    options: CodecOptions,
}

impl ProcessorBuilder {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            options: CodecOptions::default(),
        }
    }

    /// Sets codec options used for reading requests and writing replies.
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a two-way method.
    ///
    /// `R` is the method's result struct. Declared exceptions are fields of
    /// `R`; any other failure is reported with an [`ApplicationException`].
    pub fn method<A, R, F, Fut>(self, name: &str, handler: F) -> Self
    where
        A: ThriftStruct + Send + 'static,
        R: ThriftStruct + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ApplicationException>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoke = Box::new(move |dec: &mut Decoder| {
            let args = A::read(dec)?;
            let handler = handler.clone();
            let fut: HandlerFuture = async move {
                let result = handler(args).await?;
                Ok::<_, ApplicationException>(Box::new(result) as Box<dyn ReplyBody>)
            }
            .boxed();
            Ok(fut)
        });
        self.register(name, false, invoke)
    }

    /// Registers a oneway method.
    pub fn oneway<A, F, Fut>(self, name: &str, handler: F) -> Self
    where
        A: ThriftStruct + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApplicationException>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoke = Box::new(move |dec: &mut Decoder| {
            let args = A::read(dec)?;
            let handler = handler.clone();
            let fut: HandlerFuture = async move {
                handler(args).await?;
                Ok::<_, ApplicationException>(Box::new(EmptyResult) as Box<dyn ReplyBody>)
            }
            .boxed();
            Ok(fut)
        });
        self.register(name, true, invoke)
    }

    fn register(mut self, name: &str, oneway: bool, invoke: Invoke) -> Self {
        if self
            .methods
            .insert(name.to_string(), Method { oneway, invoke })
            .is_some()
        {
            tracing::warn!("Handler for method '{}' replaced", name);
        }
        self
    }

    pub fn build(self) -> Processor {
        Processor {
            methods: self.methods,
            options: self.options,
            stats: Arc::new(MethodStats::new()),
        }
    }
}

impl Default for ProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of dispatching one inbound message.
pub enum Dispatched {
    /// A reply payload that is ready now.
    Reply(Bytes),
    /// A handler that resolves to the reply payload.
    ///
    /// Resolves to `None` only when not even a bare exception could be
    /// encoded for the call.
    Deferred(BoxFuture<'static, Option<Bytes>>),
    /// A oneway handler. It never produces a reply.
    Oneway(BoxFuture<'static, ()>),
    /// A oneway message for an unregistered method.
    Ignored,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatched::Reply(bytes) => f.debug_tuple("Reply").field(&bytes.len()).finish(),
            Dispatched::Deferred(_) => f.write_str("Deferred"),
            Dispatched::Oneway(_) => f.write_str("Oneway"),
            Dispatched::Ignored => f.write_str("Ignored"),
        }
    }
}

/// A message the connection cannot recover from.
///
/// When `reply` is set it must be written before the connection closes.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct DispatchError {
    pub source: CodecError,
    pub reply: Option<Bytes>,
}

impl DispatchError {
    fn fatal(source: impl Into<CodecError>) -> Self {
        Self {
            source: source.into(),
            reply: None,
        }
    }
}

/// Resolves inbound messages to registered handlers.
pub struct Processor {
    methods: HashMap<String, Method>,
    options: CodecOptions,
    stats: Arc<MethodStats>,
}

impl Processor {
    pub fn builder() -> ProcessorBuilder {
        ProcessorBuilder::new()
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn stats(&self) -> &MethodStats {
        &self.stats
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Returns registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatches one message payload (envelope followed by the args struct).
    ///
    /// Arguments are decoded before this returns, so the caller can read
    /// the next frame while the handler runs.
    pub fn dispatch(&self, payload: Bytes) -> Result<Dispatched, DispatchError> {
        let mut dec = Decoder::with_options(payload, self.options);
        let header = read_envelope(&mut dec).map_err(DispatchError::fatal)?;

        if !matches!(header.kind, MessageType::Call | MessageType::Oneway) {
            return Err(DispatchError::fatal(ProtocolError::UnexpectedMessageType {
                name: header.name,
                kind: header.kind.as_u8(),
            }));
        }

        let Some(method) = self.methods.get(&header.name) else {
            return self.unknown_method(header, dec);
        };

        if method.oneway != (header.kind == MessageType::Oneway) {
            tracing::debug!(
                "Method '{}' registered as {} but received as {}",
                header.name,
                if method.oneway { "oneway" } else { "call" },
                header.kind
            );
        }

        self.stats.record_request(&header.name);

        let handler = match (method.invoke)(&mut dec) {
            Ok(fut) => fut,
            Err(e) => {
                self.stats.record_failure(&header.name);
                tracing::warn!(
                    "Failed to decode arguments for '{}' (seq={}): {}",
                    header.name,
                    header.seq_id,
                    e
                );
                let reply = if header.kind.expects_reply() {
                    let exc = ApplicationException::protocol(e.to_string());
                    self.exception_payload(&header, &exc).ok()
                } else {
                    None
                };
                return Err(DispatchError { source: e, reply });
            }
        };

        let stats = self.stats.clone();
        let options = self.options;
        let outcome = AssertUnwindSafe(handler).catch_unwind();

        if header.kind == MessageType::Oneway {
            return Ok(Dispatched::Oneway(
                async move {
                    match outcome.await {
                        Ok(Ok(_)) => stats.record_success(&header.name),
                        Ok(Err(exc)) => {
                            stats.record_failure(&header.name);
                            tracing::warn!("Oneway '{}' failed: {}", header.name, exc);
                        }
                        Err(_) => {
                            stats.record_failure(&header.name);
                            tracing::error!("Oneway '{}' handler panicked", header.name);
                        }
                    }
                }
                .boxed(),
            ));
        }

        Ok(Dispatched::Deferred(
            async move {
                let reply_header =
                    MessageHeader::new(header.name.clone(), MessageType::Reply, header.seq_id);
                let exc = match outcome.await {
                    Ok(Ok(body)) => match encode_reply(options, &reply_header, body.as_ref()) {
                        Ok(bytes) => {
                            stats.record_success(&header.name);
                            return Some(bytes);
                        }
                        Err(e) => {
                            tracing::error!("Failed to encode reply for '{}': {}", header.name, e);
                            ApplicationException::internal(e.to_string())
                        }
                    },
                    Ok(Err(exc)) => exc,
                    Err(_) => {
                        tracing::error!("Handler for '{}' panicked", header.name);
                        ApplicationException::internal(format!(
                            "Internal error processing {}",
                            header.name
                        ))
                    }
                };
                stats.record_failure(&header.name);
                encode_exception(options, &header, &exc).ok()
            }
            .boxed(),
        ))
    }

    fn unknown_method(
        &self,
        header: MessageHeader,
        mut dec: Decoder,
    ) -> Result<Dispatched, DispatchError> {
        self.stats.record_unknown_method();

        if header.kind == MessageType::Oneway {
            tracing::warn!("Dropping oneway call to unknown method '{}'", header.name);
            return Ok(Dispatched::Ignored);
        }

        tracing::warn!(
            "Unknown method '{}' (seq={})",
            header.name,
            header.seq_id
        );
        let exc = ApplicationException::unknown_method(&header.name);
        let reply = self
            .exception_payload(&header, &exc)
            .map_err(DispatchError::fatal)?;

        // The reply is owed even when the arguments cannot be skipped.
        match dec.skip(TType::Struct) {
            Ok(()) => Ok(Dispatched::Reply(reply)),
            Err(e) => Err(DispatchError {
                source: e,
                reply: Some(reply),
            }),
        }
    }

    fn exception_payload(
        &self,
        header: &MessageHeader,
        exc: &ApplicationException,
    ) -> Result<Bytes, CodecError> {
        encode_exception(self.options, header, exc)
    }
}

fn encode_reply(
    options: CodecOptions,
    header: &MessageHeader,
    body: &dyn ReplyBody,
) -> Result<Bytes, CodecError> {
    let mut enc = Encoder::with_options(options);
    skiff_protocol::write_message_begin(&mut enc, header)?;
    body.write_body(&mut enc)?;
    Ok(enc.into_inner().freeze())
}

/// Encodes `exc` as the EXCEPTION reply to `request`.
///
/// Falls back to the exception without its message. An error means no
/// reply can be produced at all.
fn encode_exception(
    options: CodecOptions,
    request: &MessageHeader,
    exc: &ApplicationException,
) -> Result<Bytes, CodecError> {
    let header = MessageHeader::new(request.name.clone(), MessageType::Exception, request.seq_id);
    encode_message(options, &header, exc).or_else(|e| {
        tracing::error!("Failed to encode exception for '{}': {}", request.name, e);
        let bare = ApplicationException {
            kind: exc.kind,
            message: None,
        };
        encode_message(options, &header, &bare).map_err(|e| {
            tracing::error!(
                "No reply for '{}' (seq={}): {}",
                request.name,
                request.seq_id,
                e
            );
            e
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_protocol::message::write_message;
    use skiff_protocol::{ApplicationExceptionKind, EncodeError, FieldType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct EchoArgs {
        text: String,
    }

    impl ThriftStruct for EchoArgs {
        fn descriptor() -> &'static StructDescriptor {
            static DESC: OnceLock<StructDescriptor> = OnceLock::new();
            DESC.get_or_init(|| {
                StructDescriptor::builder("echo_args")
                    .required(1, "text", FieldType::String)
                    .build()
                    .unwrap()
            })
        }

        fn to_struct_value(&self) -> StructValue {
            StructValue::new().with(1, self.text.clone())
        }

        fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
            Ok(Self {
                text: value.take_required(Self::descriptor(), 1)?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct EchoResult {
        success: Option<String>,
    }

    impl ThriftStruct for EchoResult {
        fn descriptor() -> &'static StructDescriptor {
            static DESC: OnceLock<StructDescriptor> = OnceLock::new();
            DESC.get_or_init(|| {
                StructDescriptor::builder("echo_result")
                    .optional(0, "success", FieldType::String)
                    .build()
                    .unwrap()
            })
        }

        fn to_struct_value(&self) -> StructValue {
            StructValue::new().with_optional(0, self.success.clone())
        }

        fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
            Ok(Self {
                success: value.take(Self::descriptor(), 0)?,
            })
        }
    }

    fn request(kind: MessageType, name: &str, seq_id: i32, text: &str) -> Bytes {
        let mut enc = Encoder::new();
        let header = MessageHeader::new(name, kind, seq_id);
        write_message(&mut enc, &header, &EchoArgs { text: text.into() }).unwrap();
        enc.into_inner().freeze()
    }

    fn processor(oneway_hits: Arc<AtomicUsize>) -> Processor {
        Processor::builder()
            .method("echo", |args: EchoArgs| async move {
                Ok(EchoResult {
                    success: Some(args.text),
                })
            })
            .method("fail", |_: EchoArgs| async move {
                Err::<EchoResult, _>(ApplicationException::internal("nope"))
            })
            .method("panic", |_: EchoArgs| async move {
                if true {
                    panic!("handler bug");
                }
                Ok(EchoResult { success: None })
            })
            .oneway("notify", move |_: EchoArgs| {
                let hits = oneway_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Err(ApplicationException::internal("ignored"))
                }
            })
            .build()
    }

    fn read_reply(bytes: Bytes) -> (MessageHeader, Decoder) {
        let mut dec = Decoder::new(bytes);
        let header = read_envelope(&mut dec).unwrap();
        (header, dec)
    }

    async fn resolve(dispatched: Dispatched) -> Bytes {
        match dispatched {
            Dispatched::Reply(bytes) => bytes,
            Dispatched::Deferred(fut) => fut.await.unwrap(),
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_reply() {
        let processor = processor(Arc::default());
        let dispatched = processor
            .dispatch(request(MessageType::Call, "echo", 5, "hi"))
            .unwrap();
        let (header, mut dec) = read_reply(resolve(dispatched).await);
        assert_eq!(header, MessageHeader::new("echo", MessageType::Reply, 5));
        assert_eq!(
            EchoResult::read(&mut dec).unwrap().success.as_deref(),
            Some("hi")
        );

        let stats = processor.stats().get("echo").unwrap();
        assert_eq!((stats.requests, stats.successes, stats.failures), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let processor = processor(Arc::default());
        let dispatched = processor
            .dispatch(request(MessageType::Call, "missing", 9, "x"))
            .unwrap();
        assert!(matches!(dispatched, Dispatched::Reply(_)));

        let (header, mut dec) = read_reply(resolve(dispatched).await);
        assert_eq!(
            header,
            MessageHeader::new("missing", MessageType::Exception, 9)
        );
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::UnknownMethod);
        assert_eq!(exc.message(), "Invalid method name: 'missing'");
        assert_eq!(processor.stats().unknown_methods(), 1);
    }

    #[tokio::test]
    async fn test_handler_exception() {
        let processor = processor(Arc::default());
        let dispatched = processor
            .dispatch(request(MessageType::Call, "fail", 2, "x"))
            .unwrap();
        let (header, mut dec) = read_reply(resolve(dispatched).await);
        assert_eq!(header.kind, MessageType::Exception);
        assert_eq!(header.seq_id, 2);
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.message(), "nope");
        assert_eq!(processor.stats().get("fail").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_yields_internal_error() {
        let processor = processor(Arc::default());
        let dispatched = processor
            .dispatch(request(MessageType::Call, "panic", 3, "x"))
            .unwrap();
        let (header, mut dec) = read_reply(resolve(dispatched).await);
        assert_eq!(header.kind, MessageType::Exception);
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::InternalError);
    }

    #[tokio::test]
    async fn test_oneway_never_replies() {
        let hits = Arc::new(AtomicUsize::new(0));
        let processor = processor(hits.clone());

        let dispatched = processor
            .dispatch(request(MessageType::Oneway, "notify", 0, "x"))
            .unwrap();
        match dispatched {
            Dispatched::Oneway(fut) => fut.await,
            other => panic!("expected oneway, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(processor.stats().get("notify").unwrap().failures, 1);

        let dispatched = processor
            .dispatch(request(MessageType::Oneway, "missing", 0, "x"))
            .unwrap();
        assert!(matches!(dispatched, Dispatched::Ignored));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let processor = processor(Arc::default());

        // args struct with the required field missing
        let mut enc = Encoder::new();
        skiff_protocol::write_message_begin(
            &mut enc,
            &MessageHeader::new("echo", MessageType::Call, 4),
        )
        .unwrap();
        enc.write_field_stop();

        let err = processor.dispatch(enc.into_inner().freeze()).unwrap_err();
        assert!(matches!(
            err.source,
            CodecError::Decode(DecodeError::MissingRequiredField { .. })
        ));
        let (header, mut dec) = read_reply(err.reply.unwrap());
        assert_eq!(header, MessageHeader::new("echo", MessageType::Exception, 4));
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::ProtocolError);
    }

    #[test]
    fn test_ready_handler_resolves_on_first_poll() {
        let processor = processor(Arc::default());
        let Dispatched::Deferred(fut) = processor
            .dispatch(request(MessageType::Call, "echo", 8, "now"))
            .unwrap()
        else {
            panic!("expected a deferred reply");
        };
        let mut task = tokio_test::task::spawn(fut);
        let reply = tokio_test::assert_ready!(task.poll());
        let (header, _) = read_reply(reply.unwrap());
        assert_eq!(header.seq_id, 8);
    }

    #[test]
    fn test_exception_drops_message_that_cannot_be_encoded() {
        let options = CodecOptions::default().with_max_string_len(8);
        let request = MessageHeader::new("echo", MessageType::Call, 3);
        let exc = ApplicationException::internal("a message well past the limit");

        let reply = encode_exception(options, &request, &exc).unwrap();
        let (header, mut dec) = read_reply(reply);
        assert_eq!(header, MessageHeader::new("echo", MessageType::Exception, 3));
        let exc = ApplicationException::read(&mut dec).unwrap();
        assert_eq!(exc.kind, ApplicationExceptionKind::InternalError);
        assert_eq!(exc.message, None);
    }

    #[test]
    fn test_exception_that_cannot_be_encoded_yields_no_reply() {
        let options = CodecOptions::default().with_max_string_len(3);
        let request = MessageHeader::new("echo", MessageType::Call, 3);
        let exc = ApplicationException::internal("boom");

        let err = encode_exception(options, &request, &exc).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Encode(EncodeError::StringTooLong { len: 4, max: 3 })
        ));
    }

    #[test]
    fn test_reply_kind_rejected() {
        let processor = processor(Arc::default());
        let err = processor
            .dispatch(request(MessageType::Reply, "echo", 1, "x"))
            .unwrap_err();
        assert!(err.reply.is_none());
        assert!(matches!(
            err.source,
            CodecError::Protocol(ProtocolError::UnexpectedMessageType { kind: 2, .. })
        ));
    }

    #[test]
    fn test_garbage_envelope() {
        let processor = processor(Arc::default());
        let err = processor
            .dispatch(Bytes::from_static(&[0x80, 0x01]))
            .unwrap_err();
        assert!(err.reply.is_none());
    }

    #[test]
    fn test_registration() {
        let processor = Processor::builder()
            .method("b", |_: EchoArgs| async { Ok(EchoResult { success: None }) })
            .method("a", |_: EchoArgs| async { Ok(EchoResult { success: None }) })
            .method("a", |_: EchoArgs| async { Ok(EchoResult { success: None }) })
            .build();
        assert_eq!(processor.method_names(), vec!["a", "b"]);
        assert!(processor.has_method("a"));
        assert!(!processor.has_method("c"));
    }
}
