use skiff_client::{Client, ClientError, ConnectionConfig};
use skiff_protocol::message::encode_message;
use skiff_protocol::{
    encode_frame, read_envelope, ApplicationException, ApplicationExceptionKind, CodecOptions,
    DecodeError, Decoder, FieldType, MessageHeader, MessageType, StructDescriptor, StructValue,
    ThriftStruct, DEFAULT_MAX_FRAME_SIZE,
};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

#[derive(Debug, Clone, PartialEq)]
struct Number {
    value: i32,
}

impl ThriftStruct for Number {
    fn descriptor() -> &'static StructDescriptor {
        static DESC: OnceLock<StructDescriptor> = OnceLock::new();
        DESC.get_or_init(|| {
            StructDescriptor::builder("Number")
                .optional(0, "value", FieldType::I32)
                .build()
                .unwrap()
        })
    }

    fn to_struct_value(&self) -> StructValue {
        StructValue::new().with(0, self.value)
    }

    fn from_struct_value(mut value: StructValue) -> Result<Self, DecodeError> {
        Ok(Self {
            value: value.take(Self::descriptor(), 0)?.unwrap_or_default(),
        })
    }
}

/// Server side of an in-memory connection driven by the test.
struct FakeServer {
    stream: DuplexStream,
}

impl FakeServer {
    async fn read_call(&mut self) -> (MessageHeader, Number) {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        let mut dec = Decoder::new(payload);
        let header = read_envelope(&mut dec).unwrap();
        let args = Number::read(&mut dec).unwrap();
        (header, args)
    }

    async fn send<T: ThriftStruct>(&mut self, header: MessageHeader, body: &T) {
        let payload = encode_message(CodecOptions::default(), &header, body).unwrap();
        let frame = encode_frame(&payload, DEFAULT_MAX_FRAME_SIZE).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn reply(&mut self, call: &MessageHeader, value: i32) {
        let header = MessageHeader::new(call.name.clone(), MessageType::Reply, call.seq_id);
        self.send(header, &Number { value }).await;
    }
}

async fn connect(timeout: Duration) -> (Client, FakeServer) {
    let (client_io, server_io) = duplex(64 * 1024);
    let config = ConnectionConfig::new("127.0.0.1:9090".parse().unwrap())
        .with_request_timeout(timeout);
    let client = Client::from_stream(client_io, config).await;
    (client, FakeServer { stream: server_io })
}

#[tokio::test]
async fn replies_resolve_out_of_order() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    let server_task = tokio::spawn(async move {
        let (first, first_args) = server.read_call().await;
        let (second, second_args) = server.read_call().await;
        assert_eq!(first.seq_id, 1);
        assert_eq!(second.seq_id, 2);
        server.reply(&second, second_args.value * 10).await;
        server.reply(&first, first_args.value * 10).await;
        server
    });

    let (a, b) = tokio::join!(
        client.call::<_, Number>("scale", &Number { value: 1 }),
        client.call::<_, Number>("scale", &Number { value: 2 }),
    );
    assert_eq!(a.unwrap().value, 10);
    assert_eq!(b.unwrap().value, 20);
    assert_eq!(client.connection().pending_count(), 0);
    server_task.await.unwrap();
}

#[tokio::test]
async fn exception_reply_is_application_error() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    let server_task = tokio::spawn(async move {
        let (call, _) = server.read_call().await;
        let header = MessageHeader::new(call.name.clone(), MessageType::Exception, call.seq_id);
        server
            .send(header, &ApplicationException::unknown_method(&call.name))
            .await;
        server
    });

    let err = client
        .call::<_, Number>("missing", &Number { value: 0 })
        .await
        .unwrap_err();
    let exc = err.application_exception().unwrap();
    assert_eq!(exc.kind, ApplicationExceptionKind::UnknownMethod);
    assert_eq!(exc.message(), "Invalid method name: 'missing'");
    assert!(!err.is_retryable());
    server_task.await.unwrap();
}

#[tokio::test]
async fn timeout_cancels_and_late_reply_is_dropped() {
    let (client, mut server) = connect(Duration::from_millis(50)).await;

    let err = client
        .call::<_, Number>("slow", &Number { value: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(client.connection().pending_count(), 0);

    let (late, _) = server.read_call().await;
    server.reply(&late, 1).await;

    // The connection stays usable after the late reply is discarded.
    let server_task = tokio::spawn(async move {
        let (call, args) = server.read_call().await;
        assert_eq!(call.seq_id, 2);
        server.reply(&call, args.value).await;
        server
    });
    let ok: Number = client.call("slow", &Number { value: 7 }).await.unwrap();
    assert_eq!(ok.value, 7);
    server_task.await.unwrap();
}

#[tokio::test]
async fn connection_loss_fails_pending_calls() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    let server_task = tokio::spawn(async move {
        server.read_call().await;
        drop(server);
    });

    let err = client
        .call::<_, Number>("hang", &Number { value: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
    server_task.await.unwrap();

    // Wait for the read loop to observe EOF.
    tokio::time::timeout(Duration::from_secs(1), async {
        while client.is_connected() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        client.call::<_, Number>("hang", &Number { value: 1 }).await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn wrong_method_name_rejected() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    let server_task = tokio::spawn(async move {
        let (call, _) = server.read_call().await;
        let header = MessageHeader::new("other", MessageType::Reply, call.seq_id);
        server.send(header, &Number { value: 0 }).await;
        server
    });

    let err = client
        .call::<_, Number>("mine", &Number { value: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::WrongMethodName { .. }));
    server_task.await.unwrap();
}

#[tokio::test]
async fn oneway_sends_without_pending_entry() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    client
        .call_oneway("log", &Number { value: 3 })
        .await
        .unwrap();
    assert_eq!(client.connection().pending_count(), 0);

    let (header, args) = server.read_call().await;
    assert_eq!(header.kind, MessageType::Oneway);
    assert_eq!(args.value, 3);
}

#[tokio::test]
async fn close_fails_outstanding_calls() {
    let (mut client, _server) = connect(Duration::from_secs(5)).await;

    let conn = client.connection();
    let handle = conn.send("never", &Number { value: 1 }).await.unwrap();
    assert_eq!(conn.pending_count(), 1);

    client.close().await.unwrap();
    assert!(matches!(handle.await, Err(ClientError::ConnectionClosed)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn dropping_client_fails_outstanding_calls() {
    let (client, _server) = connect(Duration::from_secs(30)).await;

    let conn = client.connection();
    let handle = conn.send("never", &Number { value: 1 }).await.unwrap();
    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("pending call should resolve once the client is dropped");
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    assert!(!conn.is_connected());
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn raw_call_returns_encoded_result() {
    let (client, mut server) = connect(Duration::from_secs(5)).await;

    let server_task = tokio::spawn(async move {
        let (call, args) = server.read_call().await;
        assert_eq!(call.kind, MessageType::Call);
        server.reply(&call, args.value + 1).await;
        server
    });

    // field 0: i32 41, then STOP
    let args = [0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x29, 0x00];
    let body = client.call_raw("incr", &args).await.unwrap();
    let result = Number::read(&mut Decoder::new(body)).unwrap();
    assert_eq!(result.value, 42);
    server_task.await.unwrap();
}
