#[cfg(test)]
mod integration_tests {
    use crate::config::{EngineConfig, LatencyPreset};
    use crate::gain::SaturationMode;
    use crate::mock_backend::{MockBackend, MockHandle};
    use crate::engine::PassthroughEngine;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const QUANTUM: usize = 96;

    fn start(config: EngineConfig) -> (PassthroughEngine, MockHandle) {
        let backend = MockBackend::new();
        let handle = backend.handle();
        let mut engine = PassthroughEngine::new(Box::new(backend), config).unwrap();
        assert!(engine.create());
        engine.set_effect_on(true);
        (engine, handle)
    }

    fn quiet_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.audio.warmup_ms = 0;
        config
    }

    /// Capture slightly faster than render, as a drifting clock would
    fn run_drifting(handle: &MockHandle, quanta: usize) {
        for _ in 0..quanta {
            handle.push_capture(&[0.05; QUANTUM + 4]);
            handle.pull_render(QUANTUM).unwrap();
        }
    }

    #[test]
    fn test_drain_holds_the_queue_near_target() {
        let mut config = quiet_config();
        config.control.apply_preset(LatencyPreset::Safe);
        let (engine, handle) = start(config);

        run_drifting(&handle, 3_000);

        let buffer_ms = engine.current_buffer_ms();
        assert!((40..=50).contains(&buffer_ms), "queue settled at {}ms", buffer_ms);
        assert!(engine.snapshot().stats.drained_frames > 0);
        assert_eq!(engine.snapshot().stats.underrun_frames, 0);
    }

    #[test]
    fn test_without_drain_the_queue_keeps_growing() {
        let (engine, handle) = start(quiet_config());

        run_drifting(&handle, 3_000);

        // 4 frames of drift per quantum: 12000 frames, 250ms
        assert_eq!(engine.current_buffer_ms(), 250);
        assert_eq!(engine.snapshot().stats.drained_frames, 0);
    }

    #[test]
    fn test_full_ring_drops_capture() {
        let (engine, handle) = start(quiet_config());

        // The default ring holds 500ms
        for _ in 0..30 {
            handle.push_capture(&[0.0; 960]);
        }
        let stats = engine.snapshot().stats;
        assert_eq!(stats.frames_captured, 24_000);
        assert_eq!(stats.overflow_frames, 30 * 960 - 24_000);
    }

    #[test]
    fn test_soft_saturation_end_to_end() {
        let mut config = quiet_config();
        config.audio.saturation = SaturationMode::Soft;
        config.control.gain = 3.0;
        let (_engine, handle) = start(config);

        // 0.96 after gain: past the knee, bent below the linear value
        handle.push_capture(&[0.32; QUANTUM]);
        let out = handle.pull_render(QUANTUM).unwrap();
        assert!(out.iter().all(|&s| s > 0.9 && s < 0.95));
    }

    #[test]
    fn test_concurrent_pumping_and_control() {
        let (mut engine, handle) = start(quiet_config());
        let running = Arc::new(AtomicBool::new(true));

        let capture = {
            let handle = handle.clone();
            let running = running.clone();
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    handle.push_capture(&[0.1; QUANTUM]);
                    thread::sleep(Duration::from_micros(500));
                }
            })
        };
        let render = {
            let handle = handle.clone();
            let running = running.clone();
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    if let Some(out) = handle.pull_render(QUANTUM) {
                        assert!(out.iter().all(|s| s.abs() <= 1.0));
                    }
                    thread::sleep(Duration::from_micros(500));
                }
            })
        };

        for step in 0..50 {
            engine.set_gain(3.0 + (step % 10) as f32);
            engine.set_target_buffer_ms(step % 40);
            engine.set_drain_rate((step % 5) as f32 / 4.0);
            engine.set_effect_on(step % 3 != 0);
            thread::sleep(Duration::from_millis(2));
        }
        engine.delete();

        running.store(false, Ordering::Relaxed);
        capture.join().unwrap();
        render.join().unwrap();

        assert!(engine.snapshot().stats.frames_rendered > 0);
        assert_eq!(engine.current_buffer_ms(), -1);
    }
}
