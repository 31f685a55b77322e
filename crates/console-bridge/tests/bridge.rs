use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use console_bridge::mock::{MockResponse, MockRuntime};
use console_bridge::{
    BridgeError, CommandCompiler, ConsoleBridge, ConsoleValue, ContainerHandle, ContainerSelector,
    ErrorKind, ExecSettings, Intent, IntentName, IntentOptions, NotFound, ReceiptPolling,
};
use serde_json::json;

const TX: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";
const ADDRESS: &str = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984";

fn container(id: &str, name: &str) -> ContainerHandle {
    ContainerHandle {
        id: id.into(),
        names: vec![format!("/{name}")],
        labels: BTreeMap::new(),
    }
}

fn setup(settings: ExecSettings) -> (Arc<MockRuntime>, ConsoleBridge) {
    let runtime = Arc::new(MockRuntime::new(vec![
        container("a1", "net1_miner_1"),
        container("b1", "net1_peer_1"),
        container("b2", "net1_peer_2"),
    ]));
    let bridge = ConsoleBridge::with_runtime(CommandCompiler::default(), runtime.clone(), settings);
    (runtime, bridge)
}

fn id(raw: &str) -> ContainerSelector {
    ContainerSelector::parse(raw)
}

#[tokio::test]
async fn balance_of_third_account() {
    let (runtime, bridge) = setup(ExecSettings::default());
    runtime.push_response(MockResponse::stdout("123"));

    let value = bridge
        .run_intent("getBalance", &id("a1"), vec!["2".into()], IntentOptions::default())
        .await
        .unwrap();
    assert_eq!(value, ConsoleValue::Text("123".into()));

    let execs = runtime.execs();
    assert_eq!(execs.len(), 1);
    assert!(execs[0].argv.iter().any(|arg| arg.contains("eth.accounts[2]")));
}

#[tokio::test]
async fn unknown_intent_touches_nothing() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let err = bridge
        .run_intent("doesNotExist", &id("a1"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownIntent);
    assert!(runtime.execs().is_empty());
}

#[tokio::test]
async fn invalid_params_touch_nothing() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let err = bridge
        .run_intent("sendTransaction", &id("a1"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
    assert!(runtime.execs().is_empty());
}

#[tokio::test]
async fn each_request_gets_its_own_session() {
    let (runtime, bridge) = setup(ExecSettings::default());
    runtime.push_response(MockResponse::chunked("true\n", 3));
    runtime.push_response(MockResponse::stdout("true\n"));

    let (a1, miner) = (id("a1"), id("name:miner"));
    let (blocks, mining) = tokio::join!(
        bridge.run_intent("getBlockNumber", &a1, vec![], IntentOptions::default()),
        bridge.run_intent("isMining", &miner, vec![], IntentOptions::default()),
    );
    assert_eq!(blocks.unwrap(), ConsoleValue::Text("true".into()));
    assert_eq!(mining.unwrap(), ConsoleValue::Structured(json!(true)));

    let execs = runtime.execs();
    assert_eq!(execs.len(), 2);
    assert!(execs.iter().all(|exec| exec.container_id == "a1"));
    assert!(execs.iter().any(|exec| exec.argv[2] == "eth.blockNumber"));
    assert!(execs.iter().any(|exec| exec.argv[2] == "eth.mining"));
}

#[tokio::test]
async fn container_resolution_failures_are_distinct() {
    let (runtime, bridge) = setup(ExecSettings::default());

    let missing = bridge
        .run_intent("getPeers", &id("zz"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        missing,
        BridgeError::ContainerNotFound(NotFound::NoSuchContainer(_))
    ));

    let ambiguous = bridge
        .run_intent("getPeers", &id("name:peer"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        ambiguous,
        BridgeError::ContainerNotFound(NotFound::Ambiguous { matches: 2, .. })
    ));

    let none = bridge
        .run_intent("getPeers", &id("name:bootnode"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(none, BridgeError::ContainerNotFound(NotFound::NoMatch(_))));
    assert!(runtime.execs().is_empty());
}

#[tokio::test]
async fn console_stderr_fails_the_request() {
    let (runtime, bridge) = setup(ExecSettings::default());
    runtime.push_response(MockResponse::stderr("Fatal: Unable to attach to remote geth: no such file\n"));

    let err = bridge
        .run_intent("getCoinbase", &id("a1"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsoleError);
    assert!(err.to_string().contains("Unable to attach"));
}

#[tokio::test]
async fn deployment_returns_transaction_hash() {
    let (runtime, bridge) = setup(ExecSettings::default());
    runtime.push_response(MockResponse::stdout(&format!(
        "{{\n  abi: [],\n  address: undefined,\n  transactionHash: \"{TX}\",\n  allEvents: function bound()\n}}\n"
    )));

    let value = bridge
        .run_intent(
            "deploySmartContract",
            &id("a1"),
            vec![
                r#"[{"type": "constructor", "inputs": []}]"#.into(),
                "6060604052".into(),
                String::new(),
                "0".into(),
            ],
            IntentOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(value.as_str(), Some(TX));

    let argv = &runtime.execs()[0].argv;
    assert_eq!(argv.len(), 4);
    assert!(argv[2].contains("\t"));
    assert!(!argv[2].contains(",value:"));
}

#[tokio::test(start_paused = true)]
async fn hung_console_times_out() {
    let (runtime, bridge) = setup(ExecSettings {
        timeout: Duration::from_secs(2),
        ..ExecSettings::default()
    });
    runtime.push_response(MockResponse::Hang);

    let err = bridge
        .run_intent("getPeerCount", &id("a1"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn confirmation_polls_until_receipt_appears() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let bridge = bridge.with_receipt_polling(ReceiptPolling {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
        max_attempts: 5,
    });
    runtime.push_response(MockResponse::stdout(&format!("\"{TX}\"\n")));
    runtime.push_response(MockResponse::stdout("null\n"));
    runtime.push_response(MockResponse::stdout("null\n"));
    runtime.push_response(MockResponse::stdout(&format!(
        "{{\n  blockNumber: 7,\n  contractAddress: null,\n  status: \"0x1\",\n  transactionHash: \"{TX}\"\n}}\n"
    )));

    let intent = Intent::new(
        IntentName::SendTransaction,
        vec![ADDRESS.into(), "1".into()],
    );
    let confirmation = bridge.submit_and_confirm(&intent, &id("a1")).await.unwrap();
    assert_eq!(confirmation.transaction_hash, TX);
    assert_eq!(confirmation.attempts, 3);
    assert_eq!(
        confirmation.receipt,
        Some(json!({
            "blockNumber": 7,
            "contractAddress": null,
            "status": "0x1",
            "transactionHash": TX
        }))
    );

    let execs = runtime.execs();
    assert_eq!(execs.len(), 4);
    assert!(execs[3].argv[2].starts_with("eth.getTransactionReceipt("));
}

#[tokio::test(start_paused = true)]
async fn confirmation_gives_up_without_error() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let bridge = bridge.with_receipt_polling(ReceiptPolling {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 2,
    });
    runtime.push_response(MockResponse::stdout(&format!("\"{TX}\"\n")));

    let intent = Intent::new(
        IntentName::SendTransaction,
        vec![ADDRESS.into(), "1".into()],
    );
    // Unqueued polls see an empty stream, which reconciles to null.
    let confirmation = bridge.submit_and_confirm(&intent, &id("a1")).await.unwrap();
    assert!(confirmation.is_pending());
    assert_eq!(confirmation.attempts, 2);
    assert_eq!(runtime.execs().len(), 3);
}

#[tokio::test]
async fn read_only_intents_cannot_be_confirmed() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let call = Intent::new(IntentName::InvokeContractFunction, vec![])
        .with_options(IntentOptions { call: true });
    let err = bridge.submit_and_confirm(&call, &id("a1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
    assert!(runtime.execs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_poll_keeps_the_transaction_hash() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let bridge = bridge.with_receipt_polling(ReceiptPolling {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 1,
    });
    runtime.push_response(MockResponse::stdout(&format!("\"{TX}\"\n")));
    runtime.push_response(MockResponse::SpawnFailure("daemon hiccup".into()));

    let intent = Intent::new(
        IntentName::SendTransaction,
        vec![ADDRESS.into(), "1".into()],
    );
    let confirmation = bridge.submit_and_confirm(&intent, &id("a1")).await.unwrap();
    assert_eq!(confirmation.transaction_hash, TX);
    assert!(confirmation.is_pending());
    assert_eq!(confirmation.attempts, 1);
    assert!(confirmation
        .poll_error
        .as_deref()
        .is_some_and(|err| err.contains("daemon hiccup")));
}

#[tokio::test(start_paused = true)]
async fn polling_continues_after_a_failed_poll() {
    let (runtime, bridge) = setup(ExecSettings::default());
    let bridge = bridge.with_receipt_polling(ReceiptPolling {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 3,
    });
    runtime.push_response(MockResponse::stdout(&format!("\"{TX}\"\n")));
    runtime.push_response(MockResponse::SpawnFailure("daemon hiccup".into()));
    runtime.push_response(MockResponse::stdout("{\n  status: \"0x1\"\n}\n"));

    let intent = Intent::new(
        IntentName::SendTransaction,
        vec![ADDRESS.into(), "1".into()],
    );
    let confirmation = bridge.submit_and_confirm(&intent, &id("a1")).await.unwrap();
    assert_eq!(confirmation.transaction_hash, TX);
    assert_eq!(confirmation.attempts, 2);
    assert_eq!(confirmation.receipt, Some(json!({ "status": "0x1" })));
    assert_eq!(confirmation.poll_error, None);
}

#[tokio::test(start_paused = true)]
async fn hung_registry_times_out_before_exec() {
    let (runtime, bridge) = setup(ExecSettings {
        timeout: Duration::from_secs(2),
        ..ExecSettings::default()
    });
    runtime.hang_registry();

    let err = bridge
        .run_intent("getPeerCount", &id("name:miner"), vec![], IntentOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(runtime.execs().is_empty());
}
