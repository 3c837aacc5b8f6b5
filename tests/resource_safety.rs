//! Run-time resource rules observed through whole programs

mod common;

use common::{Harness, ALICE};
use ore::vm::{InvalidationCause, UserErrorKind};
use ore::ExportedValue;
use pretty_assertions::assert_eq;

const VAULTS: &str = r#"
access(all) contract Vaults {
    access(all) resource Vault {
        access(all) var balance: Int

        init(balance: Int) {
            self.balance = balance
        }

        access(all) fun withdraw(amount: Int): @Vault {
            self.balance = self.balance - amount
            return <- create Vault(balance: amount)
        }

        access(all) fun deposit(from: @Vault) {
            self.balance = self.balance + from.balance
            destroy from
        }
    }

    access(all) fun createVault(balance: Int): @Vault {
        return <- create Vault(balance: balance)
    }
}
"#;

fn kind(result: Result<ExportedValue, ore::Error>) -> UserErrorKind {
    result
        .expect_err("program should fail")
        .user_kind()
        .cloned()
        .expect("user error")
}

#[test_log::test]
fn test_resource_moves_once() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {}

        fun main() {
            let r <- create R()
            let r2 <- r
            let r3 <- r
            destroy r2
            destroy r3
        }
        "#,
        &[],
    ));
    assert!(matches!(err, UserErrorKind::InvalidatedResourceUse(_)), "{:?}", err);
}

#[test_log::test]
fn test_destroy_from_own_destructor() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            destroy() {
                destroy self
            }
        }

        fun main() {
            let r <- create R()
            destroy r
        }
        "#,
        &[],
    ));
    assert_eq!(err, UserErrorKind::DestroyedResourceUse);
}

#[test_log::test]
fn test_reference_dies_with_move() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            access(all) let v: Int
            init() {
                self.v = 7
            }
        }

        fun main(): Int {
            let r <- create R()
            let ref = &r as &R
            let moved <- r
            let v = ref.v
            destroy moved
            return v
        }
        "#,
        &[],
    ));
    assert_eq!(
        err,
        UserErrorKind::InvalidatedResourceReference {
            cause: InvalidationCause::Moved
        }
    );
}

#[test_log::test]
fn test_reference_survives_field_reads() {
    let harness = Harness::new();
    let result = harness
        .script(
            r#"
            access(all) resource R {
                access(all) let v: Int
                init() {
                    self.v = 7
                }
            }

            fun main(): Int {
                let r <- create R()
                let ref = &r as &R
                let v = ref.v + ref.v
                destroy r
                return v
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(result, ExportedValue::int(14));
}

#[test_log::test]
fn test_resource_cannot_be_moved_into_itself() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            access(all) var child: @R?
            init() {
                self.child <- nil
            }
        }

        fun main() {
            let r <- create R()
            let ref = &r as &R
            ref.child <- r
        }
        "#,
        &[],
    ));
    assert_eq!(err, UserErrorKind::RecursiveTransfer);
}

#[test_log::test]
fn test_resource_cannot_be_exchanged_into_itself() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            access(all) var child: @R?
            init() {
                self.child <- nil
            }
        }

        fun main() {
            let r <- create R()
            let ref = &r as &R
            let old <- ref.child <- r
            destroy old
        }
        "#,
        &[],
    ));
    assert_eq!(err, UserErrorKind::RecursiveTransfer);
}

#[test_log::test]
fn test_resource_cannot_adopt_itself() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            access(all) var children: @[R]
            init() {
                self.children <- []
            }
            access(all) fun adopt(_ child: @R) {
                self.children.append(<- child)
            }
        }

        fun main() {
            let r <- create R()
            let ref = &r as &R
            ref.adopt(<- r)
        }
        "#,
        &[],
    ));
    // passing `r` moves it before the body runs, so `self` is already stale
    assert_eq!(
        err,
        UserErrorKind::InvalidatedResourceReference {
            cause: InvalidationCause::Moved
        }
    );
}

const LOGGED: &str = r#"
access(all) resource R {
    access(all) let v: Int
    init() {
        self.v = 1
    }
    destroy() {
        log("R")
    }
}
"#;

fn destroyed_count(harness: &Harness) -> usize {
    harness.interface.logs().iter().filter(|line| line.as_str() == "\"R\"").count()
}

#[test_log::test]
fn test_destroy_resource_array() {
    let harness = Harness::new();
    harness
        .script(
            &format!(
                "{}{}",
                LOGGED,
                r#"
                fun main() {
                    let rs <- [<- create R(), <- create R()]
                    destroy rs
                }
                "#
            ),
            &[],
        )
        .unwrap();
    assert_eq!(destroyed_count(&harness), 2);
}

#[test_log::test]
fn test_destroy_resource_dictionary() {
    let harness = Harness::new();
    harness
        .script(
            &format!(
                "{}{}",
                LOGGED,
                r#"
                fun main() {
                    let rs <- {"a": <- create R(), "b": <- create R(), "c": <- create R()}
                    destroy rs
                }
                "#
            ),
            &[],
        )
        .unwrap();
    assert_eq!(destroyed_count(&harness), 3);
}

#[test_log::test]
fn test_destroy_nested_resource() {
    let harness = Harness::new();
    harness
        .script(
            &format!(
                "{}{}",
                LOGGED,
                r#"
                access(all) resource Outer {
                    access(all) var inner: @R
                    access(all) var more: @[R]
                    init() {
                        self.inner <- create R()
                        self.more <- [<- create R()]
                    }
                }

                fun main() {
                    let outer <- create Outer()
                    destroy outer
                }
                "#
            ),
            &[],
        )
        .unwrap();
    assert_eq!(destroyed_count(&harness), 2);
}

#[test_log::test]
fn test_reference_dies_with_destroyed_container() {
    let harness = Harness::new();
    let err = kind(harness.script(
        &format!(
            "{}{}",
            LOGGED,
            r#"
            fun main(): Int {
                let rs <- [<- create R()]
                let ref = &rs[0] as &R
                destroy rs
                return ref.v
            }
            "#
        ),
        &[],
    ));
    assert_eq!(
        err,
        UserErrorKind::InvalidatedResourceReference {
            cause: InvalidationCause::Destroyed
        }
    );
}

#[test_log::test]
fn test_vault_cannot_deposit_into_itself() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Vaults", VAULTS).unwrap();

    let err = kind(harness.script(
        r#"
        import Vaults from 0x0000000000000001

        fun main(): Int {
            let vault <- Vaults.createVault(balance: 10)
            vault.deposit(from: <- vault)
            return 0
        }
        "#,
        &[],
    ));
    assert!(matches!(err, UserErrorKind::InvalidatedResourceReference { .. }), "{:?}", err);
}

#[test_log::test]
fn test_vault_withdraw_and_deposit() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Vaults", VAULTS).unwrap();

    let result = harness
        .script(
            r#"
            import Vaults from 0x0000000000000001

            fun main(): [Int] {
                let a <- Vaults.createVault(balance: 10)
                let b <- a.withdraw(amount: 3)
                var balances = [a.balance, b.balance]
                a.deposit(from: <- b)
                balances.append(a.balance)
                destroy a
                return balances
            }
            "#,
            &[],
        )
        .unwrap();
    assert_eq!(
        result,
        ExportedValue::Array(vec![ExportedValue::int(7), ExportedValue::int(3), ExportedValue::int(10)])
    );
}

#[test_log::test]
fn test_reference_into_dictionary_dies_with_removed_element() {
    let harness = Harness::new();
    let err = kind(harness.script(
        r#"
        access(all) resource R {
            access(all) var value: Int
            init() {
                self.value = 0
            }
            access(all) fun set(_ value: Int) {
                self.value = value
            }
        }

        fun main() {
            let rs <- {"a": <- create R()}
            let ref = (&rs["a"] as &R?)!
            let r <- rs.remove(key: "a")!
            destroy r
            ref.set(1)
            destroy rs
        }
        "#,
        &[],
    ));
    assert!(matches!(err, UserErrorKind::InvalidatedResourceReference { .. }), "{:?}", err);
}

#[test_log::test]
fn test_resource_left_in_transaction_field_fails() {
    let harness = Harness::new();
    harness.deploy(ALICE, "Vaults", VAULTS).unwrap();

    let err = harness
        .transaction(
            r#"
            import Vaults from 0x0000000000000001

            transaction {
                let vault: @Vaults.Vault
                prepare(signer: &Account) {
                    self.vault <- Vaults.createVault(balance: 1)
                }
            }
            "#,
            &[],
            &[ALICE],
        )
        .unwrap_err();
    assert!(matches!(err.user_kind(), Some(UserErrorKind::ResourceLoss(_))), "{:?}", err);
}
