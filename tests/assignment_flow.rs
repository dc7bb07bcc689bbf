//! End-to-end exercises of the public surface: booking lifecycle, the floor
//! event stream, and sweep-driven reclamation — as an embedding service
//! would drive them.

use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use valet::engine::Engine;
use valet::sweeper;
use valet::{Event, HoldStatus, Ms, NotifyHub, SlotStatus, StaticDirectory, VehicleType, Window};

const H: Ms = 3_600_000;

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("valet_test_integration");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

#[tokio::test]
async fn full_booking_lifecycle() {
    let vehicle = Ulid::new();
    let directory = Arc::new(StaticDirectory::new().with_vehicle(vehicle, VehicleType::Car));
    let engine = Arc::new(
        Engine::new(
            wal_path("lifecycle.wal"),
            Arc::new(NotifyHub::new()),
            directory,
        )
        .unwrap(),
    );

    let location = Ulid::new();
    let floor = Ulid::new();
    engine
        .register_floor(floor, location, VehicleType::Car, Some("Basement 1".into()), true)
        .await
        .unwrap();
    let slot = Ulid::new();
    engine.register_slot(slot, floor, "B1-042").await.unwrap();

    // Book tomorrow 14:00–16:00
    let t0 = now_ms() + 24 * H;
    let assignment = engine
        .assign(location, vehicle, Ulid::new(), t0, 2)
        .await
        .unwrap();
    assert_eq!(assignment.slot_id, slot);

    let window = Window::new(t0, t0 + 2 * H);
    assert_eq!(
        engine
            .available_slot_count(location, VehicleType::Car, window)
            .await
            .unwrap(),
        0
    );

    // The driver shows up: confirm, then the entry sensor fires
    engine.confirm(assignment.hold_id).await.unwrap();
    engine.record_entry(slot).await.unwrap();
    assert_eq!(
        engine.list_slots(floor).await[0].status,
        SlotStatus::Occupied
    );

    // ...and leaves again
    engine.record_exit(slot).await.unwrap();
    assert_eq!(
        engine.list_slots(floor).await[0].status,
        SlotStatus::Available
    );
    assert_eq!(
        engine
            .available_slot_count(location, VehicleType::Car, window)
            .await
            .unwrap(),
        1
    );

    let hold = engine.get_hold(assignment.hold_id).await.unwrap();
    assert_eq!(hold.status, HoldStatus::Confirmed);
}

#[tokio::test]
async fn floor_event_stream_sees_hold_lifecycle() {
    let vehicle = Ulid::new();
    let directory = Arc::new(StaticDirectory::new().with_vehicle(vehicle, VehicleType::Van));
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(
        Engine::new(wal_path("events.wal"), notify.clone(), directory).unwrap(),
    );

    let location = Ulid::new();
    let floor = Ulid::new();
    engine
        .register_floor(floor, location, VehicleType::Van, None, true)
        .await
        .unwrap();

    let mut rx = notify.subscribe(floor);

    let slot = Ulid::new();
    engine.register_slot(slot, floor, "V-001").await.unwrap();
    let t0 = now_ms() + 24 * H;
    let assignment = engine
        .assign(location, vehicle, Ulid::new(), t0, 1)
        .await
        .unwrap();
    engine.release(assignment.hold_id).await.unwrap();

    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::SlotRegistered { id, .. } if id == slot
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::HoldPlaced { id, slot_id, .. } if id == assignment.hold_id && slot_id == slot
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::HoldReleased { id, .. } if id == assignment.hold_id
    ));
}

#[tokio::test]
async fn background_sweeper_reclaims_on_its_own() {
    let directory = Arc::new(StaticDirectory::new());
    let engine = Arc::new(
        Engine::new(wal_path("bg_sweep.wal"), Arc::new(NotifyHub::new()), directory).unwrap(),
    );

    let floor = Ulid::new();
    engine
        .register_floor(floor, Ulid::new(), VehicleType::Car, None, true)
        .await
        .unwrap();
    let slot = Ulid::new();
    engine.register_slot(slot, floor, "G-002").await.unwrap();

    let now = now_ms();
    let hold = Ulid::new();
    engine
        .place_hold(
            hold,
            slot,
            valet::Requester {
                vehicle_id: Ulid::new(),
                user_id: Ulid::new(),
            },
            Window::new(now + H, now + 2 * H),
            now - 1_000,
        )
        .await
        .unwrap();

    let task = tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        std::time::Duration::from_millis(20),
    ));
    // Give the sweeper a few ticks
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if engine.get_hold(hold).await.unwrap().status == HoldStatus::Expired {
            break;
        }
    }
    task.abort();

    assert_eq!(engine.get_hold(hold).await.unwrap().status, HoldStatus::Expired);
    assert_eq!(
        engine.list_slots(floor).await[0].status,
        SlotStatus::Available
    );
}

#[tokio::test]
async fn no_show_is_swept_and_capacity_returns() {
    let vehicle = Ulid::new();
    let directory = Arc::new(StaticDirectory::new().with_vehicle(vehicle, VehicleType::Car));
    let engine = Arc::new(
        Engine::new(wal_path("no_show.wal"), Arc::new(NotifyHub::new()), directory).unwrap(),
    );

    let location = Ulid::new();
    let floor = Ulid::new();
    engine
        .register_floor(floor, location, VehicleType::Car, None, true)
        .await
        .unwrap();
    engine.register_slot(Ulid::new(), floor, "G-001").await.unwrap();

    // A booking whose window starts in an hour; the hold expires at the
    // window start, so a sweep an hour past that reclaims it.
    let t0 = now_ms() + H;
    let assignment = engine
        .assign(location, vehicle, Ulid::new(), t0, 2)
        .await
        .unwrap();

    assert_eq!(sweeper::sweep_once(&engine, t0 - 1).await, 0);
    assert_eq!(sweeper::sweep_once(&engine, t0 + 1).await, 1);

    assert_eq!(
        engine.get_hold(assignment.hold_id).await.unwrap().status,
        HoldStatus::Expired
    );
    let window = Window::new(t0, t0 + 2 * H);
    assert_eq!(
        engine
            .available_slot_count(location, VehicleType::Car, window)
            .await
            .unwrap(),
        1
    );
}
