mod common;

use common::gated;
use ipa_pm::sim::HwEvent;
use ipa_pm::{ClientId, PmError, PowerConfig};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Hold { client: usize },
    TryHold { client: usize },
    Release { client: usize },
    Profile { floor: u32, bandwidth_mbps: u32 },
}

const CLIENTS: [&str; 4] = ["USB_CONS", "WLAN_CONS", "Q6_CONS", "APPS_CONS"];

fn ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => (0..CLIENTS.len()).prop_map(|client| Op::Hold { client }),
        2 => (0..CLIENTS.len()).prop_map(|client| Op::TryHold { client }),
        4 => (0..CLIENTS.len()).prop_map(|client| Op::Release { client }),
        1 => (0u32..4, 0u32..2000).prop_map(|(floor, bandwidth_mbps)| Op::Profile { floor, bandwidth_mbps }),
    ];
    proptest::collection::vec(op, 0..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn clocks_track_the_count(ops in ops()) {
        let (sim, power) = gated(PowerConfig::default());
        let ids: Vec<ClientId> = CLIENTS.iter().map(|name| ClientId::resource(*name)).collect();
        let mut held = [0u32; CLIENTS.len()];

        for op in ops {
            match op {
                Op::Hold { client } => {
                    power.inc_client(&ids[client], true).unwrap();
                    held[client] += 1;
                }
                Op::TryHold { client } => {
                    let total: u32 = held.iter().sum();
                    match power.inc_client(&ids[client], false) {
                        Ok(()) => {
                            prop_assert!(total > 0);
                            held[client] += 1;
                        }
                        Err(err) => {
                            prop_assert_eq!(total, 0);
                            prop_assert_eq!(err, PmError::NotPowered);
                        }
                    }
                }
                Op::Release { client } => {
                    if held[client] == 0 {
                        continue;
                    }
                    power.dec_client(&ids[client]);
                    held[client] -= 1;
                }
                Op::Profile { floor, bandwidth_mbps } => {
                    power.set_performance_profile(floor, bandwidth_mbps).unwrap();
                }
            }

            let total: u32 = held.iter().sum();
            prop_assert_eq!(power.active_clients().count(), total);
            prop_assert_eq!(sim.clock_on(), total > 0);
            prop_assert_eq!(sim.pipes_suspended(), total == 0);
            for (name, holds) in CLIENTS.iter().zip(held) {
                let logged = power
                    .active_clients()
                    .with_log(|log| log.entry(name).map(|entry| entry.count));
                prop_assert_eq!(logged, (holds > 0).then_some(holds as i32));
            }
        }

        for (id, holds) in ids.iter().zip(held) {
            for _ in 0..holds {
                power.dec_client(id);
            }
        }
        prop_assert_eq!(power.active_clients().count(), 0);
        prop_assert!(!sim.clock_on());
        prop_assert_eq!(sim.bus_vote(), 0);
        prop_assert_eq!(
            sim.count(&HwEvent::ClockEnabled),
            sim.count(&HwEvent::ClockDisabled)
        );
    }
}
