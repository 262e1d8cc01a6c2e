#![cfg(feature = "runtime")]

use std::collections::VecDeque;
use std::future::Future;
use std::io::Cursor;
use std::sync::Mutex;

use zonesound_core::assets::MemorySampleSource;
use zonesound_core::config::{EngineConfig, SoundMode};
use zonesound_core::driver::{Driver, TickOutcome};
use zonesound_core::engine::Engine;
use zonesound_core::error::LocationFetchError;
use zonesound_core::location::LocationStore;
use zonesound_core::output::{AudioOutput, NullOutput, OutputState, WavOutput};
use zonesound_core::pool::PoolEvent;
use zonesound_core::reconciler::{Attachment, TickReport, ZoneState};
use zonesound_core::zones::Point;

/// Zone A (DN -1) at x 0..1, zone B (DN -11) at x 2..3.
const ZONES: &str = r#"{"type":"FeatureCollection","features":[
    {"type":"Feature","properties":{"name":"A","DN":-1},
     "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
    {"type":"Feature","properties":{"name":"B","DN":-11},
     "geometry":{"type":"MultiPolygon","coordinates":[[[[2,0],[3,0],[3,1],[2,1],[2,0]]]]}}
]}"#;

const A: Point = Point { lng: 0.5, lat: 0.5 };
const B: Point = Point { lng: 2.5, lat: 0.5 };
const NOWHERE: Point = Point { lng: 9.0, lat: 9.0 };

/// Plays back scripted poll results, then reports nobody.
#[derive(Default)]
struct Script {
    polls: Mutex<VecDeque<Result<Vec<Point>, LocationFetchError>>>,
}

impl Script {
    fn new(polls: Vec<Result<Vec<Point>, LocationFetchError>>) -> Self {
        Script {
            polls: Mutex::new(polls.into()),
        }
    }
}

impl LocationStore for Script {
    fn current_positions(
        &self,
    ) -> impl Future<Output = Result<Vec<Point>, LocationFetchError>> + Send {
        let next = self.polls.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        std::future::ready(next)
    }
}

fn config(mode: SoundMode, capacity: usize) -> EngineConfig {
    EngineConfig {
        mode,
        voice_capacity: capacity,
        sample_rate: 2000,
        tick_interval_ms: 100,
        ..EngineConfig::default()
    }
}

fn driver<O: AudioOutput>(
    config: EngineConfig,
    samples: MemorySampleSource,
    script: Script,
    output: O,
) -> Driver<Script, O, MemorySampleSource> {
    let engine = Engine::from_geojson(config, ZONES, samples).unwrap();
    Driver::new(engine, script, output)
}

fn report(outcome: TickOutcome) -> TickReport {
    match outcome {
        TickOutcome::Reconciled(report) => report,
        other => panic!("expected a reconciled tick, got {other:?}"),
    }
}

fn wav_bytes(level: i16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 2000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for i in 0..400 {
            writer.write_sample(if i % 2 == 0 { level } else { -level }).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}

fn all_samples() -> MemorySampleSource {
    MemorySampleSource::new()
        .with_sample(1, wav_bytes(4000))
        .with_sample(2, wav_bytes(8000))
        .with_sample(3, wav_bytes(12000))
}

#[tokio::test]
async fn walk_in_stay_and_out() {
    let script = Script::new(vec![Ok(vec![NOWHERE]), Ok(vec![A]), Ok(vec![A]), Ok(vec![NOWHERE])]);
    let mut d = driver(config(SoundMode::Click, 6), MemorySampleSource::new(), script, NullOutput::new(2000));

    let reports: Vec<TickReport> = d.run_ticks(4).await.into_iter().map(report).collect();
    assert!(reports[0].is_quiet());
    assert_eq!(reports[1].started, vec![0]);
    assert!(reports[1].stopped.is_empty());
    assert!(reports[2].is_quiet(), "tick 3 must not touch the pool: {:?}", reports[2]);
    assert_eq!(reports[3].stopped, vec![0]);
    assert!(reports[3].started.is_empty());

    let events = d.engine_mut().drain_voice_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], PoolEvent::Started { zone_id: 0, .. }));
    assert!(matches!(events[1], PoolEvent::Stopped { zone_id: 0, evicted: false, .. }));
}

#[tokio::test]
async fn same_batch_twice_is_free() {
    let script = Script::new(vec![Ok(vec![A, B]), Ok(vec![A, B])]);
    let mut d = driver(config(SoundMode::Click, 6), MemorySampleSource::new(), script, NullOutput::new(2000));
    d.tick().await;
    d.engine_mut().drain_voice_events();
    let second = report(d.tick().await);
    assert!(second.is_quiet());
    assert!(d.engine_mut().drain_voice_events().is_empty());
}

#[tokio::test]
async fn capacity_one_evicts_a_for_b() {
    let script = Script::new(vec![Ok(vec![A]), Ok(vec![A, B])]);
    let mut d = driver(config(SoundMode::Click, 1), MemorySampleSource::new(), script, NullOutput::new(2000));
    d.tick().await;
    let second = report(d.tick().await);
    assert_eq!(second.started, vec![1]);
    assert_eq!(second.evicted, vec![0]);

    let events = d.engine_mut().drain_voice_events();
    let kinds: Vec<(usize, bool)> = events
        .iter()
        .map(|e| match e {
            PoolEvent::Started { zone_id, .. } => (*zone_id, true),
            PoolEvent::Stopped { zone_id, .. } => (*zone_id, false),
        })
        .collect();
    assert_eq!(kinds, vec![(0, true), (0, false), (1, true)]);
    assert_eq!(d.status().live_voices, 1);
}

#[tokio::test]
async fn failed_fetch_keeps_zone_state() {
    let script = Script::new(vec![
        Ok(vec![A]),
        Err(LocationFetchError::Status(503)),
        Ok(vec![A]),
    ]);
    let mut d = driver(config(SoundMode::Click, 6), MemorySampleSource::new(), script, NullOutput::new(2000));
    d.tick().await;
    let before = d.engine().zone_states().to_vec();

    match d.tick().await {
        TickOutcome::Skipped(LocationFetchError::Status(503)) => {}
        other => panic!("expected a skipped tick, got {other:?}"),
    }
    assert_eq!(d.engine().zone_states(), before.as_slice());
    assert_eq!(d.status().live_voices, 1, "the voice keeps playing through the outage");

    let after = report(d.tick().await);
    assert!(after.is_quiet(), "recovery must not restart the zone");
}

#[tokio::test]
async fn locked_output_defers_until_unlock() {
    let script = Script::new(vec![Ok(vec![B]), Ok(vec![B]), Ok(vec![B])]);
    let mut d = driver(
        config(SoundMode::Click, 6),
        MemorySampleSource::new(),
        script,
        NullOutput::gesture_gated(2000),
    );
    let locked = report(d.tick().await);
    assert_eq!(locked.deferred, vec![1]);
    assert_eq!(d.engine().zone_states()[1], ZoneState::Active(Attachment::Pending));
    assert_eq!(d.status().output_state, OutputState::Suspended);

    d.unlock();
    let started = report(d.tick().await);
    assert_eq!(started.started, vec![1]);
    let steady = report(d.tick().await);
    assert!(steady.is_quiet());
    assert!(d.output().frames_written() > 0);
}

#[tokio::test]
async fn loop_mode_plays_the_mapped_samples() {
    let script = Script::new(vec![Ok(vec![A, B])]);
    let mut d = driver(config(SoundMode::Loop, 6), all_samples(), script, NullOutput::new(2000));
    d.start();
    for id in 1..=3 {
        assert!(d.engine().assets().get(id).await.is_some(), "sample {id} should decode");
    }
    assert_eq!(d.engine().assets().loads_started(), 3, "preload started each sample once");

    let first = report(d.tick().await);
    assert_eq!(first.started, vec![0, 1]);
    let samples: Vec<Option<u32>> = d.engine().voices().iter().map(|v| v.sample_id).collect();
    assert_eq!(samples, vec![Some(1), Some(3)], "lowest DN gets the last sample");
    assert!(d.output().peak() > 0.0);
}

#[tokio::test]
async fn missing_sample_silences_only_its_zone() {
    // zone A maps to sample 1, zone B to sample 3
    let samples = MemorySampleSource::new().with_sample(3, wav_bytes(9000));
    let script = Script::new(vec![Ok(vec![A, B]); 4]);
    let mut d = driver(config(SoundMode::Loop, 6), samples, script, NullOutput::new(2000));
    d.start();
    assert!(d.engine().assets().get(1).await.is_none());
    assert!(d.engine().assets().get(3).await.is_some());

    let report = report(d.tick().await);
    assert_eq!(report.started, vec![1]);
    assert_eq!(d.engine().zone_states()[0], ZoneState::Active(Attachment::Failed));
    assert_eq!(d.status().active_zones, vec![0, 1]);
}

#[tokio::test]
async fn mode_switch_hands_over_cleanly() {
    let script = Script::new(vec![Ok(vec![A, B]); 3]);
    let mut d = driver(config(SoundMode::Click, 6), all_samples(), script, NullOutput::new(2000));
    d.start();
    for id in 1..=3 {
        d.engine().assets().get(id).await;
    }
    d.tick().await;
    assert!(d.engine().voices().iter().all(|v| v.kind == SoundMode::Click));

    assert!(d.engine_mut().set_mode(SoundMode::Loop));
    assert_eq!(d.status().live_voices, 0);
    assert!(d.status().active_zones.is_empty());

    let after = report(d.tick().await);
    assert_eq!(after.started, vec![0, 1]);
    let kinds: Vec<SoundMode> = d.engine().voices().iter().map(|v| v.kind).collect();
    assert_eq!(kinds, vec![SoundMode::Loop, SoundMode::Loop]);
}

#[tokio::test]
async fn halt_mid_decode_never_starts_voices() {
    let script = Script::new(vec![Ok(vec![A])]);
    let mut d = driver(config(SoundMode::Loop, 6), all_samples(), script, NullOutput::new(2000));
    d.start();
    d.halt();
    let cache = d.engine().assets().clone();
    assert!(cache.get(1).await.is_some(), "in-flight decode still fills the cache");
    assert!(matches!(d.tick().await, TickOutcome::Halted));
    assert_eq!(d.status().live_voices, 0);
}

#[tokio::test]
async fn renders_a_walk_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("walk.wav");
    let script = Script::new(vec![Ok(vec![A]), Ok(vec![A, B]), Ok(vec![B]), Ok(vec![])]);
    let output = WavOutput::create_file(&path, 2000).unwrap();
    let mut d = driver(config(SoundMode::Click, 6), MemorySampleSource::new(), script, output);
    d.start();
    d.run_ticks(4).await;
    d.halt();
    let mut output = d.into_output();
    output.close();

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 2000);
    assert!(reader.len() >= 4 * 200, "expected at least four ticks of audio, got {}", reader.len());
}
