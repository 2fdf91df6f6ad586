use std::convert::Infallible;
use std::hint::black_box;
use std::time::Instant;

use blockview_common::BlockPos;
use blockview_kernel::{ClockConfig, ClockState, Phases, SimulationLoop, WorldModel};

fn bench_frames(frames: usize, interval_ms: f64) {
    let mut lp = SimulationLoop::new(ClockConfig::default()).expect("default config is valid");
    lp.start(0.0);
    let mut updates = 0u64;
    let mut phases = Phases {
        update: |c: &ClockState| -> Result<(), Infallible> {
            updates += black_box(c.steps()) & 1;
            Ok(())
        },
        render: |c: &ClockState| -> Result<(), Infallible> {
            black_box(c.render_alpha());
            Ok(())
        },
    };

    let start = Instant::now();
    let mut t = 0.0;
    for _ in 0..frames {
        t += interval_ms;
        let _ = black_box(lp.frame(black_box(t), &mut phases));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / frames as u32;
    println!(
        "  frame ({frames} frames @ {interval_ms} ms): {per_iter:?}/frame, total {elapsed:?}, steps={}",
        lp.clock().steps()
    );
}

fn bench_insert(blocks: i32) {
    let mut world = WorldModel::new();
    let start = Instant::now();
    for i in 0..blocks {
        world.insert_block(black_box(BlockPos::new(i % 64, i / 4096, (i / 64) % 64)));
    }
    let elapsed = start.elapsed();
    println!(
        "  insert ({blocks} blocks): {:?}/insert, total {elapsed:?}",
        elapsed / blocks as u32
    );
}

fn main() {
    println!("=== Clock Benchmarks ===\n");

    println!("Fixed-step frames:");
    bench_frames(100_000, 16.6);
    bench_frames(100_000, 6.9);
    bench_frames(10_000, 250.0);

    println!("\nWorld model inserts:");
    bench_insert(1_000);
    bench_insert(100_000);

    println!("\n=== Done ===");
}
