//! RPC over real TCP connections on the loopback interface.

use futures::future::join_all;
use stratus_rpc::network::{NetworkClient, NetworkServer, NetworkServerHandle};
use stratus_rpc::{
    MethodTable, NetworkComponent, NetworkConfig, PacketListenerRegistry, Result, RpcClass,
    RpcError, RpcFactory, RpcHandlerRegistry, RpcSender,
};
use std::sync::Arc;
use std::time::Duration;

struct Calculator;

impl RpcClass for Calculator {
    const NAME: &'static str = "Calculator";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .method("add", |_calc: &Self, (a, b): (i64, i64)| a + b)
            .method("slow_echo", |_calc: &Self, (value, delay_ms): (String, u64)| {
                std::thread::sleep(Duration::from_millis(delay_ms));
                value
            })
            .build()
    }
}

/// Served by the connecting side; the node calls it back.
struct Greeter;

impl RpcClass for Greeter {
    const NAME: &'static str = "Greeter";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .method("greet", |_greeter: &Self, (name,): (String,)| format!("hello {name}"))
            .build()
    }
}

/// Served by the node; forwards to the caller's `Greeter` over the same connection.
struct Relay {
    greeter: RpcSender,
}

impl RpcClass for Relay {
    const NAME: &'static str = "Relay";

    fn method_table() -> MethodTable {
        MethodTable::builder::<Self>(Self::NAME)
            .fallible_method("greet_back", |relay: &Self, (name,): (String,)| -> Result<String> {
                relay
                    .greeter
                    .invoke_method("greet", (name,))?
                    .fire_sync::<String>()
            })
            .build()
    }
}

fn listeners(factory: &RpcFactory, handlers: &Arc<RpcHandlerRegistry>) -> Arc<PacketListenerRegistry> {
    let listeners = Arc::new(PacketListenerRegistry::new());
    listeners.add_listener(
        NetworkConfig::RPC_CHANNEL,
        Arc::new(factory.new_packet_listener(Arc::clone(handlers))),
    );
    listeners
}

async fn start_node(factory: &RpcFactory) -> (NetworkServerHandle, Arc<RpcHandlerRegistry>) {
    let handlers = Arc::new(RpcHandlerRegistry::new());
    handlers.register_handler(factory.new_handler_for(Some(Arc::new(Calculator))));
    let server = NetworkServer::bind("127.0.0.1:0", listeners(factory, &handlers))
        .await
        .unwrap();
    (server, handlers)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_over_tcp() {
    let factory = RpcFactory::default();
    let (mut server, _handlers) = start_node(&factory).await;
    let client = Arc::new(
        NetworkClient::connect(server.addr(), Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap(),
    );
    let sender = factory.new_sender_for::<Calculator>(Some(client.clone() as Arc<dyn NetworkComponent>));

    let sum: i64 = sender.invoke_method("add", (40i64, 2i64)).unwrap().fire().await.unwrap();
    assert_eq!(sum, 42);

    let sum: i64 = sender.invoke_method("add", (1i64, 2i64)).unwrap().fire_sync().unwrap();
    assert_eq!(sum, 3);

    client.close();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_calls_are_correlated() {
    let factory = RpcFactory::default();
    let (mut server, _handlers) = start_node(&factory).await;
    let client = Arc::new(
        NetworkClient::connect(server.addr(), Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap(),
    );
    let sender = factory.new_sender_for::<Calculator>(Some(client.clone() as Arc<dyn NetworkComponent>));

    // Earlier calls sleep longer, so responses arrive out of order
    let calls = (0..8u64).map(|i| {
        sender
            .invoke_method("slow_echo", (format!("call-{i}"), (8 - i) * 10))
            .unwrap()
            .fire::<String>()
    });
    let results = join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), format!("call-{i}"));
    }

    client.close();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_calls_release_their_waiters() {
    let factory = RpcFactory::builder()
        .call_timeout(Some(Duration::from_millis(20)))
        .build();
    let (mut server, _handlers) = start_node(&factory).await;
    let client = Arc::new(
        NetworkClient::connect(server.addr(), Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap(),
    );
    let sender = factory.new_sender_for::<Calculator>(Some(client.clone() as Arc<dyn NetworkComponent>));

    for i in 0..4 {
        let err = sender
            .invoke_method("slow_echo", (format!("late-{i}"), 200u64))
            .unwrap()
            .fire::<String>()
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }
    assert_eq!(client.channel().pending_queries(), 0);

    // Late responses are discarded and the connection stays usable
    tokio::time::sleep(Duration::from_millis(300)).await;
    let sum: i64 = sender
        .invoke_method("add", (2i64, 3i64))
        .unwrap()
        .timeout(Some(Duration::from_secs(5)))
        .fire()
        .await
        .unwrap();
    assert_eq!(sum, 5);
    assert_eq!(client.channel().pending_queries(), 0);

    client.close();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_calls_back_into_caller() {
    let factory = RpcFactory::default();

    let node_handlers = Arc::new(RpcHandlerRegistry::new());
    let mut server = NetworkServer::bind("127.0.0.1:0", listeners(&factory, &node_handlers))
        .await
        .unwrap();
    let connections: Arc<dyn NetworkComponent> = server.component();
    let relay = Relay {
        greeter: factory.new_sender_for::<Greeter>(Some(connections)),
    };
    node_handlers.register_handler(factory.new_handler_for(Some(Arc::new(relay))));

    let caller_handlers = Arc::new(RpcHandlerRegistry::new());
    caller_handlers.register_handler(factory.new_handler_for(Some(Arc::new(Greeter))));
    let client = Arc::new(
        NetworkClient::connect(server.addr(), listeners(&factory, &caller_handlers))
            .await
            .unwrap(),
    );
    for _ in 0..50 {
        if server.connection_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let greeting: String = factory
        .new_sender_for::<Relay>(Some(client.clone() as Arc<dyn NetworkComponent>))
        .invoke_method("greet_back", ("ann".to_string(),))
        .unwrap()
        .fire()
        .await
        .unwrap();

    assert_eq!(greeting, "hello ann");

    client.close();
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_shutdown_fails_pending_call() {
    let factory = RpcFactory::builder().call_timeout(None).build();
    let (mut server, _handlers) = start_node(&factory).await;
    let client = Arc::new(
        NetworkClient::connect(server.addr(), Arc::new(PacketListenerRegistry::new()))
            .await
            .unwrap(),
    );
    let sender = factory.new_sender_for::<Calculator>(Some(client.clone() as Arc<dyn NetworkComponent>));

    let pending = sender
        .invoke_method("slow_echo", ("late".to_string(), 1_000u64))
        .unwrap()
        .fire::<String>();
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.shutdown();

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("pending call should fail once the connection closes")
        .unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed));
}
