#[cfg(test)]
mod ring_buffer_tests {
    use crate::ring_buffer::frame_ring;
    use rand::Rng;
    use std::thread;

    const TOTAL_FRAMES: usize = 200_000;

    #[test]
    fn test_concurrent_producer_consumer_keeps_order_and_bounds() {
        let (mut producer, mut consumer) = frame_ring(512, 2);

        let writer = thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut next = 0usize;
            let mut chunk = Vec::with_capacity(128);

            while next < TOTAL_FRAMES {
                let frames = rng.gen_range(1..=64).min(TOTAL_FRAMES - next);
                chunk.clear();
                for i in 0..frames {
                    let value = (next + i) as f32;
                    chunk.push(value);
                    chunk.push(-value);
                }

                let written = producer.write(&chunk);
                assert!(written <= frames);
                assert!(producer.occupancy_frames() <= producer.capacity_frames());
                next += written;
                if written == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut rng = rand::thread_rng();
        let mut out = vec![0.0f32; 2 * 64];
        let mut seen = 0usize;
        let mut last: Option<f32> = None;

        while seen < TOTAL_FRAMES {
            assert!(consumer.occupancy_frames() <= consumer.capacity_frames());

            if rng.gen_bool(0.1) {
                seen += consumer.discard(rng.gen_range(1..=16));
                continue;
            }

            let wanted = rng.gen_range(1..=64);
            let read = consumer.read(&mut out[..wanted * 2]);
            for frame in out[..read * 2].chunks_exact(2) {
                assert_eq!(frame[1], -frame[0], "channels drifted apart");
                if let Some(previous) = last {
                    assert!(frame[0] > previous, "{} arrived after {}", frame[0], previous);
                }
                last = Some(frame[0]);
            }
            seen += read;

            if read == 0 {
                if writer.is_finished() && consumer.occupancy_frames() == 0 {
                    break;
                }
                thread::yield_now();
            }
        }

        writer.join().unwrap();
        assert_eq!(seen, TOTAL_FRAMES);
    }

    #[test]
    fn test_full_buffer_rejects_until_drained() {
        let (mut producer, mut consumer) = frame_ring(4, 1);
        assert_eq!(producer.write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 4);
        assert_eq!(producer.write(&[6.0]), 0);

        let mut out = [0.0f32; 2];
        assert_eq!(consumer.read(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(producer.write(&[6.0, 7.0, 8.0]), 2);

        let mut rest = [0.0f32; 4];
        assert_eq!(consumer.read(&mut rest), 4);
        assert_eq!(rest, [3.0, 4.0, 6.0, 7.0]);
    }
}
