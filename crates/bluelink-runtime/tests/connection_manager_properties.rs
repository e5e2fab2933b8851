//! Property-based tests for connection orchestration
//!
//! Random interleavings of user requests and capability completions must never open two
//! links at once, never leave a queued connect stranded, and never drive the state
//! machine into an invalid transition. A failure stays visible until acknowledged.

use bluelink_core::{
    AttemptId, ChannelHandle, ConnectionEffect, ConnectionState, Device, DeviceId,
    FailureReason, SystemTimeSource, Timestamp,
};
use bluelink_runtime::ConnectionManager;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Connect(u8),
    Disconnect,
    Succeed { stale: bool },
    Fail { stale: bool },
    TeardownDone,
    LinkLost { current: bool },
    Acknowledge,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3).prop_map(Op::Connect),
        Just(Op::Disconnect),
        any::<bool>().prop_map(|stale| Op::Succeed { stale }),
        any::<bool>().prop_map(|stale| Op::Fail { stale }),
        Just(Op::TeardownDone),
        any::<bool>().prop_map(|current| Op::LinkLost { current }),
        Just(Op::Acknowledge),
    ]
}

fn device(index: u8) -> Device {
    let id = DeviceId::new(format!("dev-{}", index)).unwrap();
    Device::unseen(id, Timestamp::new(0))
}

fn unused_channel() -> ChannelHandle {
    ChannelHandle::new(u64::MAX)
}

proptest! {
    #[test]
    fn orchestration_invariants_hold(ops in prop::collection::vec(arb_op(), 1..80)) {
        let mut manager = ConnectionManager::new(SystemTimeSource, 32);
        let mut next_channel = 1u64;
        let mut link_open = false;

        for op in ops {
            let channel_in_use = manager.state().channel();
            let failed_before = matches!(manager.state(), ConnectionState::Failed(_));
            let was_failure = matches!(op, Op::Fail { .. });
            let was_acknowledge = matches!(op, Op::Acknowledge);
            let result = match op {
                Op::Connect(index) => manager.request_connect(device(index)),
                Op::Disconnect => manager.request_disconnect(),
                Op::Succeed { stale } => {
                    let attempt = match (stale, manager.current_attempt()) {
                        (false, Some(attempt)) => attempt,
                        _ => AttemptId::new(0),
                    };
                    next_channel += 1;
                    manager.on_connect_result(attempt, Ok(ChannelHandle::new(next_channel)))
                }
                Op::Fail { stale } => {
                    let attempt = match (stale, manager.current_attempt()) {
                        (false, Some(attempt)) => attempt,
                        _ => AttemptId::new(0),
                    };
                    manager.on_connect_result(attempt, Err(FailureReason::DeviceUnreachable))
                }
                Op::TeardownDone => {
                    manager.on_teardown_complete(channel_in_use.unwrap_or_else(unused_channel))
                }
                Op::LinkLost { current } => {
                    let channel = if current {
                        channel_in_use.unwrap_or_else(unused_channel)
                    } else {
                        unused_channel()
                    };
                    manager.on_link_lost(channel)
                }
                Op::Acknowledge => manager.acknowledge_failure(),
            };

            let effects = result.expect("orchestration never requests an invalid transition");
            for effect in &effects {
                match effect {
                    ConnectionEffect::OpenSession { .. } => {
                        prop_assert!(!link_open, "a second link opened before the first closed");
                        link_open = true;
                    }
                    ConnectionEffect::CloseSession => link_open = false,
                    _ => {}
                }
            }

            // Only a failed attempt enters `Failed`, and acknowledging it leaves
            let failed_now = matches!(manager.state(), ConnectionState::Failed(_));
            if failed_now && !failed_before {
                prop_assert!(was_failure);
            }
            if was_acknowledge {
                prop_assert!(!failed_now);
            }

            // A queued connect only exists while a teardown is in progress
            if manager.queued().is_some() {
                prop_assert!(matches!(manager.state(), ConnectionState::Disconnecting(_)));
            }

            prop_assert_eq!(link_open, manager.state().channel().is_some());
        }
    }
}
