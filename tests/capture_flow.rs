//! End-to-end state machine scenarios: the stage sequence, the timer
//! protocol and result synthesis driven together, with simulated frames
//! standing in for the camera and model.

use rand::rngs::StdRng;
use rand::SeedableRng;

use stature::{
    CaptureConfig, CaptureError, CaptureEvent, CaptureSession, CaptureStage, Keypoint,
    KeypointIndex, MeasurementTable, MeasurementValue, PoseEstimate, ResultSynthesizer,
    SessionSignal,
};

fn pose(shoulder_width: f32, hip_width: f32) -> PoseEstimate {
    let required = [
        KeypointIndex::Nose,
        KeypointIndex::LeftShoulder,
        KeypointIndex::RightShoulder,
        KeypointIndex::LeftHip,
        KeypointIndex::RightHip,
        KeypointIndex::LeftKnee,
        KeypointIndex::RightKnee,
        KeypointIndex::LeftAnkle,
        KeypointIndex::RightAnkle,
    ];
    let keypoints = required
        .iter()
        .map(|&index| {
            let x = match index {
                KeypointIndex::LeftShoulder => 320.0 + shoulder_width / 2.0,
                KeypointIndex::RightShoulder => 320.0 - shoulder_width / 2.0,
                KeypointIndex::LeftHip => 320.0 + hip_width / 2.0,
                KeypointIndex::RightHip => 320.0 - hip_width / 2.0,
                _ => 320.0,
            };
            Keypoint::new(index, x, 240.0, 0.9)
        })
        .collect();
    PoseEstimate::new(keypoints)
}

fn fire_armed(session: &mut CaptureSession) -> Option<SessionSignal> {
    let (_, generation) = session.next_deadline().expect("a timer should be armed");
    session.timer_fired(generation)
}

fn table() -> MeasurementTable {
    MeasurementTable::from_json(
        r#"{
            "150": { "Waist": [26.0], "Hip": [34.0, 35.0] },
            "160": { "Waist": [28.0, 29.0], "Hip": [36.0], "Thigh": [null] },
            "170": { "Waist": [30.0], "Hip": [38.0] }
        }"#,
    )
    .unwrap()
}

/// Walk the machine from a fresh start all the way to `Done`, then
/// synthesize the record the way the engine does.
#[test]
fn full_capture_flow_produces_record() {
    let mut session = CaptureSession::new(&CaptureConfig::default());

    session.stream_attached();
    assert_eq!(session.stage(), CaptureStage::FrontPrompt);
    assert!(session.model_loaded(session.epoch()));

    fire_armed(&mut session); // front prompt dwell
    assert_eq!(session.stage(), CaptureStage::DetectingFront);
    assert!(session.detection_active());

    // Front capture: hold, confirm, count down.
    session.handle_estimate(Some(pose(200.0, 100.0)));
    fire_armed(&mut session); // confirmation
    for _ in 0..5 {
        fire_armed(&mut session); // countdown
    }
    assert_eq!(session.stage(), CaptureStage::SidePrompt);

    fire_armed(&mut session); // side prompt dwell
    assert_eq!(session.stage(), CaptureStage::DetectingSide);

    // A wrong-orientation frame first: feedback only, no timer.
    session.handle_estimate(Some(pose(200.0, 100.0)));
    assert!(!session.timer_pending());

    // Side capture.
    session.handle_estimate(Some(pose(40.0, 100.0)));
    fire_armed(&mut session);
    let mut signal = None;
    for _ in 0..5 {
        signal = fire_armed(&mut session);
    }
    assert_eq!(signal, Some(SessionSignal::Synthesize));
    assert_eq!(session.stage(), CaptureStage::Done);

    // The engine's synthesis step, with the stored height simulated.
    let synthesizer = ResultSynthesizer::new(table());
    let record = synthesizer
        .synthesize_with_rng(Some(162.0), &mut StdRng::seed_from_u64(11))
        .unwrap();

    assert_eq!(record.height_cm, 162.0);
    assert_eq!(record.measurements.len(), 3);
    let waist = record.measurements["Waist"].as_f64().unwrap();
    assert!(waist == 28.0 || waist == 29.0);
    assert_eq!(record.measurements["Thigh"], MeasurementValue::Unavailable);

    session.result_ready();
    assert_eq!(fire_armed(&mut session), Some(SessionSignal::DeliverResult));

    // Countdown events came through for both captures: 5 down to 1, twice.
    let countdowns: Vec<u32> = session
        .take_updates()
        .iter()
        .filter_map(|e| match e {
            CaptureEvent::Countdown(Some(n)) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(countdowns, vec![5, 4, 3, 2, 1, 5, 4, 3, 2, 1]);
}

#[test]
fn permission_denial_is_terminal_until_retake() {
    let mut session = CaptureSession::new(&CaptureConfig::default());

    session.stream_failed(CaptureError::PermissionDenied);
    assert_eq!(session.stage(), CaptureStage::Error);
    assert!(!session.detection_active());

    // Frames and loads arriving afterwards change nothing.
    session.handle_estimate(Some(pose(200.0, 100.0)));
    assert!(!session.model_loaded(session.epoch()));
    assert_eq!(session.stage(), CaptureStage::Error);

    // Retake recovers.
    session.reset();
    assert_eq!(session.stage(), CaptureStage::Initializing);
    assert!(session.fault().is_none());

    session.stream_attached();
    assert_eq!(session.stage(), CaptureStage::FrontPrompt);
}

#[test]
fn retake_mid_countdown_discards_the_capture() {
    let mut session = CaptureSession::new(&CaptureConfig::default());
    session.stream_attached();
    session.model_loaded(session.epoch());
    fire_armed(&mut session);

    session.handle_estimate(Some(pose(200.0, 100.0)));
    fire_armed(&mut session); // countdown at 5
    fire_armed(&mut session); // 4
    let (_, stale) = session.next_deadline().unwrap();

    session.reset();
    assert_eq!(session.timer_fired(stale), None);
    assert_eq!(session.stage(), CaptureStage::Initializing);

    // The session runs cleanly again after the reset.
    session.stream_attached();
    session.model_loaded(session.epoch());
    fire_armed(&mut session);
    assert_eq!(session.stage(), CaptureStage::DetectingFront);
    assert!(session.detection_active());
}
