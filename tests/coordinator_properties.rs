//! Behavioral properties of the alarm coordinator.
//!
//! Every test runs on a paused tokio clock, so durations are exact and the
//! countdown/grace timers fire deterministically:
//! - Non-table (state, event) pairs are no-ops
//! - Authentication inside the countdown prevents the alarm
//! - An uninterrupted countdown alarms exactly once
//! - Proximity hysteresis and debouncing
//! - Timer generations survive every race between disarm and expiry

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{advance, sleep, Instant};

use theftguard::auth::AuthFailureReason;
use theftguard::daemon::{AlarmCoordinator, AlarmMachine, ConfigUpdate, CoordinatorHandle};
use theftguard::types::{
    AlarmState, Command, CountdownConfig, DeviceId, DeviceSpec, EscalationPolicy, GuardConfig,
    Proximity, TimerGeneration, TimerKind, TransitionEvent, TransportKind,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn phone() -> DeviceId {
    DeviceId::new("AA:BB:CC:DD:EE:01")
}

fn config_with_phone(auto_arm: bool) -> GuardConfig {
    GuardConfig {
        devices: vec![DeviceSpec::new(phone().as_str(), "Phone", TransportKind::LowEnergy)],
        auto_arm_on_leave: auto_arm,
        ..GuardConfig::default()
    }
}

fn start(config: &GuardConfig) -> (CoordinatorHandle, broadcast::Receiver<Command>) {
    let (coordinator, handle) = AlarmCoordinator::new(config).unwrap();
    let feed = handle.commands();
    coordinator.spawn();
    (handle, feed)
}

fn drain(feed: &mut broadcast::Receiver<Command>) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Ok(command) = feed.try_recv() {
        commands.push(command);
    }
    commands
}

fn count(commands: &[Command], name: &str) -> usize {
    commands.iter().filter(|c| c.name() == name).count()
}

/// Every event kind, with a stamp that never matches a live timer.
fn all_events() -> Vec<TransitionEvent> {
    vec![
        TransitionEvent::InputDetected,
        TransitionEvent::LidClosed,
        TransitionEvent::PowerDisconnected,
        TransitionEvent::DeviceNear(phone()),
        TransitionEvent::AllDevicesAway,
        TransitionEvent::CountdownExpired(TimerGeneration(0)),
        TransitionEvent::GraceExpired(TimerGeneration(0)),
        TransitionEvent::AuthSucceeded,
        TransitionEvent::AuthFailed(AuthFailureReason::PinIncorrect),
        TransitionEvent::UserArm,
        TransitionEvent::UserDisarm,
    ]
}

/// Drives a fresh machine into `state`.
fn machine_in(state: AlarmState) -> AlarmMachine {
    let mut machine = AlarmMachine::new(CountdownConfig::default(), EscalationPolicy::default(), false);
    let path: &[TransitionEvent] = match state {
        AlarmState::Idle => &[],
        AlarmState::Armed => &[TransitionEvent::UserArm],
        AlarmState::Triggered => &[TransitionEvent::UserArm, TransitionEvent::InputDetected],
        AlarmState::Alarming => &[
            TransitionEvent::UserArm,
            TransitionEvent::InputDetected,
            TransitionEvent::CountdownExpired(TimerGeneration(1)),
        ],
    };
    for event in path {
        machine.apply(event);
    }
    assert_eq!(machine.state(), state);
    machine
}

// ============================================================================
// Transition Table
// ============================================================================

mod table_properties {
    use super::*;

    fn is_table_pair(state: AlarmState, event: &TransitionEvent) -> bool {
        use TransitionEvent::*;
        match state {
            AlarmState::Idle => matches!(event, UserArm | AllDevicesAway),
            AlarmState::Armed => matches!(
                event,
                InputDetected | LidClosed | PowerDisconnected | DeviceNear(_) | UserDisarm
            ),
            AlarmState::Triggered => matches!(
                event,
                AuthSucceeded | AuthFailed(_) | CountdownExpired(_) | DeviceNear(_) | UserDisarm
            ),
            AlarmState::Alarming => matches!(
                event,
                AuthSucceeded | AuthFailed(_) | DeviceNear(_) | UserDisarm
            ),
        }
    }

    #[test]
    fn non_table_pairs_change_nothing() {
        for state in AlarmState::ALL {
            for event in all_events() {
                if is_table_pair(state, &event) {
                    continue;
                }
                let mut machine = machine_in(state);
                let effects = machine.apply(&event);
                assert_eq!(machine.state(), state, "{:?} + {:?}", state, event);
                assert!(effects.is_empty(), "{:?} + {:?} issued {:?}", state, event, effects);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forged_expiry_never_alarms() {
        let (handle, mut feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::LidClosed).unwrap();
        handle
            .send(TransitionEvent::CountdownExpired(TimerGeneration(42)))
            .unwrap();
        handle.settle().await;

        assert_eq!(handle.snapshot().state, AlarmState::Triggered);
        assert_eq!(count(&drain(&mut feed), "play_alarm"), 0);
    }
}

// ============================================================================
// Countdown
// ============================================================================

mod countdown_properties {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn auth_just_before_expiry_prevents_alarm() {
        let (handle, mut feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::InputDetected).unwrap();
        handle.settle().await;

        sleep(Duration::from_millis(2900)).await;
        handle.send(TransitionEvent::AuthSucceeded).unwrap();
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Armed);

        sleep(Duration::from_secs(10)).await;
        handle.settle().await;

        assert_eq!(handle.snapshot().state, AlarmState::Armed);
        assert_eq!(count(&drain(&mut feed), "play_alarm"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn uninterrupted_countdown_alarms_exactly_once() {
        let (handle, mut feed) = start(&GuardConfig::default());
        let mut states = handle.subscribe();

        let triggered_at = Instant::now();
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::PowerDisconnected).unwrap();

        loop {
            states.changed().await.unwrap();
            if states.borrow().state == AlarmState::Alarming {
                break;
            }
        }
        assert_eq!(triggered_at.elapsed(), Duration::from_secs(3));

        sleep(Duration::from_secs(30)).await;
        handle.settle().await;

        let commands = drain(&mut feed);
        assert_eq!(count(&commands, "play_alarm"), 1);
        assert_eq!(handle.snapshot().state, AlarmState::Alarming);
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_gets_full_countdown() {
        let (handle, _feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::InputDetected).unwrap();
        handle.settle().await;

        sleep(Duration::from_millis(2500)).await;
        handle.send(TransitionEvent::AuthSucceeded).unwrap();
        handle.send(TransitionEvent::LidClosed).unwrap();
        handle.settle().await;

        let timer = handle.snapshot().timer.unwrap();
        assert_eq!(timer.kind, TimerKind::Countdown);
        assert_eq!(timer.remaining_ms, 3000);

        // The first countdown would have expired here.
        sleep(Duration::from_millis(1000)).await;
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Triggered);

        sleep(Duration::from_millis(2500)).await;
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Alarming);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auth_keeps_countdown_running() {
        let (handle, mut feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::InputDetected).unwrap();
        handle
            .send(TransitionEvent::AuthFailed(AuthFailureReason::BiometricFailed))
            .unwrap();
        handle
            .send(TransitionEvent::AuthFailed(AuthFailureReason::PinIncorrect))
            .unwrap();
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.failed_auth_attempts, 2);
        assert_eq!(snapshot.timer.map(|t| t.kind), Some(TimerKind::Countdown));
        assert_eq!(count(&drain(&mut feed), "auth_retry"), 2);

        sleep(Duration::from_secs(4)).await;
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Alarming);
    }
}

// ============================================================================
// Disarm / Expiry Races
// ============================================================================

mod race_properties {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn disarm_then_expiry_leaves_nothing_running() {
        let (handle, mut feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::InputDetected).unwrap();
        handle.settle().await;

        sleep(Duration::from_millis(2999)).await;
        handle.send(TransitionEvent::UserDisarm).unwrap();
        sleep(Duration::from_secs(1)).await;
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert_eq!(snapshot.timer, None);
        assert_eq!(count(&drain(&mut feed), "play_alarm"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_then_disarm_stops_the_alarm() {
        let (handle, mut feed) = start(&GuardConfig::default());
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::InputDetected).unwrap();
        sleep(Duration::from_secs(4)).await;
        handle.send(TransitionEvent::UserDisarm).unwrap();
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert_eq!(snapshot.timer, None);

        let commands = drain(&mut feed);
        assert_eq!(count(&commands, "play_alarm"), 1);
        assert_eq!(count(&commands, "stop_alarm"), 1);
        let play = commands.iter().position(|c| c.name() == "play_alarm").unwrap();
        let stop = commands.iter().position(|c| c.name() == "stop_alarm").unwrap();
        assert!(play < stop);
    }

    #[tokio::test(start_paused = true)]
    async fn every_path_to_idle_restores_sleep_policy() {
        for disarm in [
            TransitionEvent::UserDisarm,
            TransitionEvent::DeviceNear(phone()),
        ] {
            let (handle, mut feed) = start(&config_with_phone(false));
            handle.send(TransitionEvent::UserArm).unwrap();
            handle.send(TransitionEvent::InputDetected).unwrap();
            handle.send(disarm).unwrap();
            handle.settle().await;

            let commands = drain(&mut feed);
            assert_eq!(count(&commands, "prevent_sleep"), 1);
            assert_eq!(count(&commands, "restore_sleep_policy"), 1);
            assert_eq!(count(&commands, "stop_monitors"), 1);
            handle.shutdown();
        }
    }
}

// ============================================================================
// Proximity
// ============================================================================

mod proximity_properties {
    use super::*;

    fn proximity(handle: &CoordinatorHandle) -> Proximity {
        handle.snapshot().devices[0].proximity
    }

    #[tokio::test(start_paused = true)]
    async fn weak_signal_needs_confirmation_window() {
        let (handle, _feed) = start(&config_with_phone(false));

        handle.record_sample(phone(), Some(-40)).unwrap();
        handle.settle().await;
        assert_eq!(proximity(&handle), Proximity::Near);

        // Keep the device fresh with weak readings, just inside the window.
        let weak_from = Instant::now();
        while weak_from.elapsed() < Duration::from_millis(7900) {
            handle.record_sample(phone(), Some(-80)).unwrap();
            advance(Duration::from_millis(100)).await;
        }
        handle.settle().await;
        assert_eq!(proximity(&handle), Proximity::Near);

        advance(Duration::from_millis(100)).await;
        handle.record_sample(phone(), Some(-80)).unwrap();
        handle.settle().await;
        assert_eq!(proximity(&handle), Proximity::Away);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_zone_reading_never_flips_state() {
        let (handle, _feed) = start(&config_with_phone(false));

        for _ in 0..50 {
            handle.record_sample(phone(), Some(-68)).unwrap();
            advance(Duration::from_millis(500)).await;
        }
        handle.settle().await;
        assert_eq!(proximity(&handle), Proximity::Away);
        assert!(!handle.snapshot().any_device_near);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_devices_never_emit_proximity_events() {
        let (handle, mut feed) = start(&GuardConfig {
            auto_arm_on_leave: true,
            ..GuardConfig::default()
        });

        handle.record_sample(phone(), Some(-30)).unwrap();
        sleep(Duration::from_secs(120)).await;
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert!(!snapshot.grace_pending);
        assert!(drain(&mut feed).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn returning_device_disarms_an_alarm() {
        let (handle, mut feed) = start(&config_with_phone(false));
        handle.send(TransitionEvent::UserArm).unwrap();
        handle.send(TransitionEvent::LidClosed).unwrap();
        sleep(Duration::from_secs(4)).await;
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Alarming);

        handle.record_sample(phone(), Some(-45)).unwrap();
        handle.settle().await;

        assert_eq!(handle.snapshot().state, AlarmState::Idle);
        assert_eq!(count(&drain(&mut feed), "stop_alarm"), 1);
    }
}

// ============================================================================
// Auto-arm Grace
// ============================================================================

mod grace_properties {
    use super::*;

    async fn walk_away(handle: &CoordinatorHandle) {
        handle.record_sample(phone(), Some(-40)).unwrap();
        handle.settle().await;
        handle.record_sample(phone(), Some(-90)).unwrap();
        sleep(Duration::from_millis(8500)).await;
        handle.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_arms_after_grace() {
        let (handle, _feed) = start(&config_with_phone(true));
        walk_away(&handle).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert!(snapshot.grace_pending);

        sleep(Duration::from_secs(31)).await;
        handle.settle().await;
        assert_eq!(handle.snapshot().state, AlarmState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_grace_never_arms() {
        let (handle, _feed) = start(&config_with_phone(true));
        walk_away(&handle).await;
        assert!(handle.snapshot().grace_pending);

        handle.record_sample(phone(), Some(-40)).unwrap();
        handle.settle().await;
        assert!(!handle.snapshot().grace_pending);

        // Stay near well past the cancelled deadline.
        for _ in 0..12 {
            sleep(Duration::from_secs(5)).await;
            handle.record_sample(phone(), Some(-40)).unwrap();
        }
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert!(!snapshot.grace_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_grace_expiry_is_ignored() {
        let (handle, _feed) = start(&config_with_phone(true));
        walk_away(&handle).await;
        handle.send(TransitionEvent::UserDisarm).unwrap();
        handle
            .send(TransitionEvent::GraceExpired(TimerGeneration(1)))
            .unwrap();
        handle.settle().await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, AlarmState::Idle);
        assert!(!snapshot.grace_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_every_device_drops_pending_grace() {
        let (handle, mut feed) = start(&config_with_phone(true));
        walk_away(&handle).await;
        assert!(handle.snapshot().grace_pending);

        handle
            .configure(ConfigUpdate::RemoveDevice(phone()))
            .await
            .unwrap();
        handle.settle().await;
        let snapshot = handle.snapshot();
        assert!(snapshot.devices.is_empty());
        assert!(!snapshot.grace_pending);
        assert_eq!(snapshot.timer, None);

        sleep(Duration::from_secs(31)).await;
        handle.settle().await;

        assert_eq!(handle.snapshot().state, AlarmState::Idle);
        assert_eq!(count(&drain(&mut feed), "start_monitors"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_last_near_device_starts_grace() {
        let (handle, _feed) = start(&config_with_phone(true));
        handle.record_sample(phone(), Some(-40)).unwrap();
        handle
            .configure(ConfigUpdate::AddDevice(DeviceSpec::new(
                "watch",
                "Watch",
                TransportKind::Classic,
            )))
            .await
            .unwrap();
        assert!(!handle.snapshot().grace_pending);

        handle
            .configure(ConfigUpdate::RemoveDevice(phone()))
            .await
            .unwrap();
        assert!(handle.snapshot().grace_pending);
    }
}
