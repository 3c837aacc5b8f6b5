//! Runtime entry points, host failures and concurrency

mod common;

use std::sync::Arc;

use anyhow::anyhow;
use common::{address, Harness, ALICE};
use ore::vm::{ExternalError, IntegerKind, StaticType, UserErrorKind};
use ore::{Address, Context, Error, ExportedValue, Interface, Location, MemoryLedger, Runtime, RuntimeConfig};
use pretty_assertions::assert_eq;

const ADDER: &str = r#"
access(all) contract Adder {
    access(all) fun add(a: Int, b: Int): Int {
        return a + b
    }
}
"#;

const COUNTER: &str = r#"
access(all) contract Counter {
    access(all) var count: Int

    init() {
        self.count = 0
    }

    access(all) fun increment(): Int {
        self.count = self.count + 1
        return self.count
    }
}
"#;

/// Host whose logging callback panics and which cannot provide signers
struct BrokenHost;

impl Interface for BrokenHost {
    fn program_log(&self, _message: &str) -> anyhow::Result<()> {
        panic!("log sink is gone")
    }

    fn get_signing_accounts(&self) -> anyhow::Result<Vec<Address>> {
        Err(anyhow!("signers unavailable"))
    }
}

#[test_log::test]
fn test_script_arguments() {
    let harness = Harness::new();
    let result = harness
        .script(
            r#"
            fun main(greeting: String, count: Int): [String] {
                var out: [String] = []
                var i = 0
                while i < count {
                    out.append(greeting)
                    i = i + 1
                }
                return out
            }
            "#,
            &[ExportedValue::string("hi"), ExportedValue::int(2)],
        )
        .unwrap();
    assert_eq!(
        result,
        ExportedValue::Array(vec![ExportedValue::string("hi"), ExportedValue::string("hi")])
    );
}

#[test_log::test]
fn test_scripts_do_not_commit() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Counter", COUNTER).unwrap();
    let increment = "import Counter from 0x0000000000000001\nfun main(): Int { return Counter.increment() }";
    assert_eq!(harness.script(increment, &[]).unwrap(), ExportedValue::int(1));
    assert_eq!(harness.script(increment, &[]).unwrap(), ExportedValue::int(1));

    harness
        .transaction(
            r#"
            import Counter from 0x0000000000000001

            transaction {
                prepare(signer: &Account) {
                    Counter.increment()
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap();
    assert_eq!(
        harness
            .script("import Counter from 0x0000000000000001\nfun main(): Int { return Counter.count }", &[])
            .unwrap(),
        ExportedValue::int(1)
    );
}

#[test_log::test]
fn test_hex_encoding_round_trips() {
    let harness = Harness::new();
    let text = "resource";
    let result = harness
        .script(
            r#"
            fun main(text: String): [String] {
                let encoded = String.encodeHex(text.utf8)
                let decoded = String.fromUTF8(encoded.decodeHex()) ?? panic("invalid UTF-8")
                return [encoded, decoded]
            }
            "#,
            &[ExportedValue::string(text)],
        )
        .unwrap();
    assert_eq!(
        result,
        ExportedValue::Array(vec![ExportedValue::string(hex::encode(text)), ExportedValue::string(text)])
    );
}

#[test_log::test]
fn test_log_and_metering_reach_the_host() {
    let harness = Harness::new();
    harness
        .script(r#"fun main() { log("hello") }"#, &[])
        .unwrap();
    assert_eq!(harness.interface.logs(), vec!["\"hello\"".to_string()]);
    assert!(harness.interface.computation_used() > 0);
}

#[test_log::test]
fn test_invoke_contract_function() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Adder", ADDER).unwrap();

    let location = Location::address(address(ALICE), "Adder");
    let script = Location::Script("invoke".to_string());
    let int = StaticType::Integer(IntegerKind::Int);
    let result = harness
        .runtime
        .invoke_contract_function(
            &location,
            "add",
            &[ExportedValue::int(40), ExportedValue::int(2)],
            &[int.clone(), int],
            Context::new(&harness.interface, &harness.ledger, &script),
        )
        .unwrap();
    assert_eq!(result, ExportedValue::int(42));

    let err = harness
        .runtime
        .invoke_contract_function(
            &location,
            "subtract",
            &[],
            &[],
            Context::new(&harness.interface, &harness.ledger, &script),
        )
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::MissingMember { .. })), "{:?}", err);
}

#[test_log::test]
fn test_parse_and_check_program_loads_imports() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Adder", ADDER).unwrap();

    let location = Location::Script("check".to_string());
    let program = harness
        .runtime
        .parse_and_check_program(
            "import Adder from 0x0000000000000001\nfun main(): Int { return Adder.add(a: 1, b: 2) }",
            Context::new(&harness.interface, &harness.ledger, &location),
        )
        .unwrap();
    assert_eq!(program.location, location);

    let err = harness
        .runtime
        .parse_and_check_program(
            "import Missing from 0x0000000000000001\nfun main() {}",
            Context::new(&harness.interface, &harness.ledger, &location),
        )
        .unwrap_err();
    assert!(err.is_user(), "{:?}", err);
}

#[test_log::test]
fn test_call_stack_limit() {
    let harness = Harness::with_config(RuntimeConfig {
        stack_depth_limit: 100,
        ..RuntimeConfig::default()
    });
    let err = harness
        .script(
            r#"
            fun f(n: Int): Int {
                return f(n: n + 1)
            }

            fun main(): Int {
                return f(n: 0)
            }
            "#,
            &[],
        )
        .unwrap_err();
    assert_eq!(err.user_kind(), Some(&UserErrorKind::CallStackLimitExceeded(100)));
}

#[test_log::test]
fn test_panicking_host_callback_is_reported() {
    let runtime = Runtime::default();
    let ledger = MemoryLedger::new();
    let location = Location::Script("broken".to_string());
    let err = runtime
        .execute_script(
            r#"fun main() { log("hello") }"#,
            &[],
            Context::new(&BrokenHost, &ledger, &location),
        )
        .unwrap_err();
    match err {
        Error::External(ExternalError::CallbackPanic { callback, message }) => {
            assert_eq!(callback, "program_log");
            assert!(message.contains("log sink is gone"), "{}", message);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // the runtime stays usable after a host panic
    let result = runtime
        .execute_script(
            "fun main(): Int { return 1 }",
            &[],
            Context::new(&BrokenHost, &ledger, &location),
        )
        .unwrap();
    assert_eq!(result, ExportedValue::int(1));
}

#[test_log::test]
fn test_failing_host_callback_is_external() {
    let runtime = Runtime::default();
    let ledger = MemoryLedger::new();
    let location = Location::Transaction("broken".to_string());
    let err = runtime
        .execute_transaction(
            "transaction {}",
            &[],
            Context::new(&BrokenHost, &ledger, &location),
        )
        .unwrap_err();
    assert!(err.is_external(), "{:?}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scripts_share_the_cache() {
    let harness = Arc::new(Harness::new());
    harness.deploy(ALICE, "Adder", ADDER).unwrap();

    let mut handles = Vec::new();
    for i in 0..16_i64 {
        let harness = harness.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            harness.script(
                "import Adder from 0x0000000000000001\nfun main(x: Int): Int { return Adder.add(a: x, b: 1) }",
                &[ExportedValue::int(i)],
            )
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, ExportedValue::int(i as i64 + 1));
    }

    let stats = harness.runtime.cache().stats();
    assert_eq!(stats.entries, 1);
    assert!(stats.hits + stats.misses >= 16);
}
