// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Failure handling: per-sample drops, fatal hardware errors, negotiation
//! fallbacks and resource release on every exit path.

mod common;

use common::{Nv12Planes, encode_all};
use hwenc::hw::loopback::LoopbackOptions;
use hwenc::{CodecKind, Encoder, EncoderError, EncoderSettings, EncoderState};

#[test]
fn test_malformed_samples_dropped_without_packet() {
    let (mut encoder, _) = common::encoder(
        LoopbackOptions::default().corrupting_every(3),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let packets = encode_all(&mut encoder, 9).unwrap();

    // frames 2, 5 and 8 carry overrunning length prefixes
    assert_eq!(packets.len(), 6);
    assert!(packets.iter().all(|p| p.pts % 3 != 2));
    assert_eq!(encoder.stats().dropped_samples, 3);
    assert_eq!(encoder.state(), EncoderState::Ready);
}

#[test]
fn test_undersized_output_buffer_drops_frame() {
    let (mut encoder, monitor) = common::encoder(
        LoopbackOptions::default().oversizing_every(4),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let packets = encode_all(&mut encoder, 8).unwrap();

    assert_eq!(packets.len(), 6);
    assert_eq!(encoder.stats().dropped_samples, 2);
    assert_eq!(encoder.state(), EncoderState::Ready);

    let session = encoder.session().unwrap();
    let surfaces = session.surface_stats();
    assert_eq!(surfaces.free, surfaces.capacity);
    assert_eq!(monitor.snapshot().frames_submitted, 8);
}

#[test]
fn test_missing_layout_uses_fallback() {
    let (mut encoder, _) = common::encoder(
        LoopbackOptions::default().without_layout(),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let packets = encode_all(&mut encoder, 5).unwrap();

    assert_eq!(packets.len(), 5);
    assert!(packets[0].keyframe);
    assert_eq!(common::count_long_start_codes(encoder.extra_data()), 2);
    assert_eq!(encoder.stats().parameter_set_fallbacks, 5);
}

#[test]
fn test_device_loss_is_fatal_and_releases_everything() {
    let (mut encoder, monitor) = common::encoder(
        LoopbackOptions::default()
            .with_device_surfaces(true)
            .losing_device_after(3),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let planes = Nv12Planes::new(common::WIDTH, common::HEIGHT, 0);

    for pts in 0..3 {
        encoder.encode(planes.frame().into(), pts).unwrap();
    }
    let err = encoder.encode(planes.frame().into(), 3).unwrap_err();
    assert!(matches!(err, EncoderError::DeviceLost(_)));
    assert!(err.is_fatal());

    assert_eq!(encoder.state(), EncoderState::Destroyed);
    assert!(encoder.session_id().is_none());
    assert!(encoder.last_error().unwrap().contains("stopped responding"));

    let counters = monitor.snapshot();
    assert_eq!(counters.live_sessions, 0);
    assert_eq!(counters.live_device_surfaces, 0);
    assert_eq!(counters.dropped_without_close, 0);

    let after = encoder.encode(planes.frame().into(), 4);
    assert!(matches!(after, Err(EncoderError::InvalidState(_))));
}

#[test]
fn test_completion_stall_times_out() {
    let (mut encoder, monitor) = common::encoder(
        LoopbackOptions::default().stalling_after(2),
        CodecKind::Avc,
        EncoderSettings::default()
            .with_async_depth(2)
            .with_completion_timeout(50),
    );
    let planes = Nv12Planes::new(common::WIDTH, common::HEIGHT, 0);

    let mut failure = None;
    for pts in 0..16 {
        if let Err(e) = encoder.encode(planes.frame().into(), pts) {
            failure = Some(e);
            break;
        }
    }

    let err = failure.expect("stalled hardware must surface an error");
    assert!(matches!(err, EncoderError::Timeout(_)));
    assert_eq!(encoder.state(), EncoderState::Destroyed);

    let counters = monitor.snapshot();
    assert_eq!(counters.live_sessions, 0);
    assert_eq!(counters.dropped_without_close, 0);
    assert_eq!(
        counters.blocking_syncs, 1,
        "teardown must not wait on the stalled task again"
    );
    assert_eq!(counters.closed_with_pending, 1);
}

#[test]
fn test_failed_sync_destroys_encoder() {
    let options = LoopbackOptions {
        fail_sync_after: Some(1),
        ..Default::default()
    };
    let (mut encoder, monitor) = common::encoder(
        options.with_device_surfaces(true),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let planes = Nv12Planes::new(common::WIDTH, common::HEIGHT, 0);

    let mut failure = None;
    for pts in 0..16 {
        if let Err(e) = encoder.encode(planes.frame().into(), pts) {
            failure = Some(e);
            break;
        }
    }

    let err = failure.expect("failed sync must surface an error");
    assert!(matches!(err, EncoderError::SyncFailed(_)));
    assert!(err.is_fatal());
    assert_eq!(encoder.state(), EncoderState::Destroyed);
    assert!(encoder.session_id().is_none());
    assert!(encoder.last_error().unwrap().contains("stopped responding"));

    let counters = monitor.snapshot();
    assert_eq!(counters.live_sessions, 0);
    assert_eq!(counters.live_device_surfaces, 0);
    assert_eq!(counters.dropped_without_close, 0);

    let after = encoder.encode(planes.frame().into(), 16);
    assert!(matches!(after, Err(EncoderError::InvalidState(_))));
}

#[test]
fn test_close_error_after_hard_reconfigure_keeps_new_session() {
    let options = LoopbackOptions {
        fail_close: true,
        ..Default::default()
    };
    let (mut encoder, monitor) =
        common::encoder(options, CodecKind::Avc, EncoderSettings::default());
    encode_all(&mut encoder, 3).unwrap();
    let id = encoder.session_id();
    assert!(!encoder.extra_data().is_empty());

    let larger = hwenc::VideoFormat::new(640, 480, hwenc::PixelFormat::Nv12)
        .with_fps(hwenc::Rational::new(30, 1));
    let kind = encoder
        .reconfigure(larger, EncoderSettings::default())
        .unwrap();
    assert_eq!(kind, hwenc::ChangeKind::Hard);
    assert_ne!(encoder.session_id(), id);
    assert_eq!(encoder.state(), EncoderState::Ready);
    assert!(
        encoder.extra_data().is_empty(),
        "old session's parameter sets were dropped"
    );
    assert_eq!(monitor.snapshot().live_sessions, 1);

    let packets = encode_all(&mut encoder, 3).unwrap();
    assert_eq!(packets.len(), 3);
    assert_eq!(encoder.session().unwrap().params().width, 640);
}

#[test]
fn test_low_power_rejection_falls_back() {
    let (mut encoder, monitor) = common::encoder(
        LoopbackOptions::default().rejecting_low_power(),
        CodecKind::Avc,
        EncoderSettings::default().with_bframes(false),
    );
    assert!(!encoder.session().unwrap().params().low_power);

    let packets = encode_all(&mut encoder, 4).unwrap();
    assert_eq!(packets.len(), 4);
    assert_eq!(monitor.snapshot().sessions_opened, 1);
}

#[test]
fn test_failed_creation_reports_and_leaks_nothing() {
    let options = LoopbackOptions {
        fail_init: true,
        ..Default::default()
    };
    let (device, monitor) = common::device(options);
    let mut encoder = Encoder::new(device, CodecKind::Avc);

    let err = encoder
        .initialize(common::format(), EncoderSettings::default())
        .unwrap_err();
    assert!(matches!(err, EncoderError::Hardware(_)));
    assert_eq!(encoder.state(), EncoderState::Destroyed);
    assert!(encoder.last_error().is_some());

    let counters = monitor.snapshot();
    assert_eq!(counters.sessions_opened, 1);
    assert_eq!(counters.live_sessions, 0);
}

#[test]
fn test_drop_without_destroy_closes_session() {
    let (device, monitor) =
        common::device(LoopbackOptions::default().with_device_surfaces(true));
    {
        let mut encoder = Encoder::create(
            device,
            CodecKind::Hevc,
            common::format(),
            EncoderSettings::default(),
        )
        .unwrap();
        let planes = Nv12Planes::new(common::WIDTH, common::HEIGHT, 0);
        for pts in 0..4 {
            encoder.encode(planes.frame().into(), pts).unwrap();
        }
        assert!(encoder.session().unwrap().in_flight() > 0);
    }

    let counters = monitor.snapshot();
    assert_eq!(counters.live_sessions, 0);
    assert_eq!(counters.live_device_surfaces, 0);
    assert_eq!(counters.closed_with_pending, 0, "drained before close");
    assert_eq!(counters.dropped_without_close, 0);
}

#[test]
fn test_invalid_frame_is_not_fatal() {
    let (mut encoder, _) = common::encoder(
        LoopbackOptions::default(),
        CodecKind::Avc,
        EncoderSettings::default(),
    );
    let wrong_size = Nv12Planes::new(common::WIDTH / 2, common::HEIGHT / 2, 0);
    let err = encoder.encode(wrong_size.frame().into(), 0).unwrap_err();
    assert!(matches!(err, EncoderError::InvalidFrame(_)));
    assert_eq!(encoder.state(), EncoderState::Ready);

    let packets = encode_all(&mut encoder, 2).unwrap();
    assert_eq!(packets.len(), 2);
}
