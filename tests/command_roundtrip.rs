use benchlink::channel::{
    CallEnvelope, ChannelServer, ClientChannel, Endpoint, KIND_HANDLER_FAILURE,
    KIND_INVALID_ARGUMENTS, KIND_UNKNOWN_COMMAND,
};
use benchlink::command::{ArgSet, CommandSchema, Dispatcher, HandlerTable, Proxy};
use benchlink::config::TimeoutConfig;
use benchlink::error::{CallError, HandlerFailure};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = r#"
{
    "ping": { "description": "Liveness check" },
    "echo": { "description": "Echo a message", "cmd": "{msg}" },
    "add":  { "description": "Add two numbers", "cmd": "{a} {b}", "device_method": "add_numbers" },
    "raw":  { "description": "Rendered device string", "cmd": "SET {channel} {value}" },
    "fail": { "description": "Always fails" }
}
"#;

fn schema() -> Arc<CommandSchema> {
    Arc::new(CommandSchema::load(SCHEMA).unwrap())
}

fn table() -> HandlerTable {
    HandlerTable::new()
        .method("ping", |_args| Ok(json!("pong")))
        .method("echo", |args| Ok(json!({ "msg": args.str("msg")? })))
        .method("add_numbers", |args| {
            Ok(json!(args.f64("a")? + args.f64("b")?))
        })
        .method("raw", |args| Ok(json!(args.rendered())))
        .method("fail", |_args| {
            Err(HandlerFailure::new("device not connected"))
        })
}

async fn serve() -> (ChannelServer, Endpoint) {
    let dispatcher = Dispatcher::bind(schema(), table()).unwrap();
    let server = ChannelServer::bind(("127.0.0.1", 0), Arc::new(dispatcher))
        .await
        .unwrap();
    let endpoint = Endpoint::new("127.0.0.1", server.port());
    (server, endpoint)
}

fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        connect: Duration::from_secs(1),
        request: Duration::from_secs(2),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn calls_round_trip_through_the_dispatcher() {
    let (_server, endpoint) = serve().await;
    let proxy = Proxy::direct(schema(), endpoint, timeouts());

    let pong = proxy.call("ping", ArgSet::new()).await.unwrap();
    assert_eq!(pong, json!("pong"));

    let echoed = proxy
        .call("echo", ArgSet::new().kwarg("msg", "hello bench"))
        .await
        .unwrap();
    assert_eq!(echoed, json!({"msg": "hello bench"}));

    let sum = proxy
        .call("add", ArgSet::new().arg(1.5).arg(2.25))
        .await
        .unwrap();
    assert_eq!(sum, json!(3.75));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_round_trips_are_idempotent() {
    let (_server, endpoint) = serve().await;
    let proxy = Proxy::direct(schema(), endpoint, timeouts());

    for _ in 0..5 {
        let echoed = proxy
            .call("echo", ArgSet::new().kwarg("msg", "stable"))
            .await
            .unwrap();
        assert_eq!(echoed, json!({"msg": "stable"}));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn the_template_renders_the_device_string_server_side() {
    let (_server, endpoint) = serve().await;
    let proxy = Proxy::direct(schema(), endpoint, timeouts());

    let rendered = proxy
        .call("raw", ArgSet::new().arg("CH1").arg(3.25))
        .await
        .unwrap();
    assert_eq!(rendered, json!("SET CH1 3.25"));
}

#[tokio::test(flavor = "multi_thread")]
async fn argument_validation_happens_before_anything_is_sent() {
    let (_server, endpoint) = serve().await;
    let proxy = Proxy::direct(schema(), endpoint, timeouts());

    let err = proxy.call("echo", ArgSet::new()).await.unwrap_err();
    assert!(matches!(err, CallError::InvalidArguments { .. }));

    let err = proxy
        .call("warp", ArgSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::UnknownCommand(name) if name == "warp"));
}

#[tokio::test(flavor = "multi_thread")]
async fn error_replies_carry_typed_kinds() {
    let (_server, endpoint) = serve().await;
    let proxy = Proxy::direct(schema(), endpoint, timeouts());

    let err = proxy.call("fail", ArgSet::new()).await.unwrap_err();
    match err {
        CallError::Remote(reply) => {
            assert_eq!(reply.kind, KIND_HANDLER_FAILURE);
            assert_eq!(reply.message, "device not connected");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }

    // A failing call never takes the dispatcher down.
    let pong = proxy.call("ping", ArgSet::new()).await.unwrap();
    assert_eq!(pong, json!("pong"));
}

// A raw channel bypasses the proxy's client-side validation, so the
// dispatcher's own checks are observable on the wire.
#[tokio::test(flavor = "multi_thread")]
async fn the_dispatcher_validates_independently_of_the_proxy() {
    let (_server, endpoint) = serve().await;
    let channel = ClientChannel::connect(endpoint, timeouts()).await.unwrap();

    let call = CallEnvelope::new("warp", Value::Null);
    let reply = channel.call(&call).await.unwrap();
    assert_eq!(reply.token, call.token);
    assert_eq!(reply.error.unwrap().kind, KIND_UNKNOWN_COMMAND);

    let call = CallEnvelope::new("echo", json!({"bogus": 1}));
    let reply = channel.call(&call).await.unwrap();
    assert_eq!(reply.error.unwrap().kind, KIND_INVALID_ARGUMENTS);
}
