use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, black_box};

use voxbust::buster::{BusterConfig, BusterContext, BusterTask, LevelScanner, TaskId};
use voxbust::world::{BlockData, Material, MemoryWorld, OwnerId, Region, WorldAdapter, WorldId};

fn terrain(regions: i32, height: i32) -> (Arc<MemoryWorld>, Vec<Region>) {
    let world = Arc::new(MemoryWorld::new());
    let stone = BlockData::new(Material::new("STONE"), 0);
    let regions: Vec<Region> = (0..regions).map(|x| Region::new(WorldId(0), x, 0)).collect();
    for region in &regions {
        world.fill(*region, 1..=height, &stone);
    }
    (world, regions)
}

fn context(world: Arc<MemoryWorld>, levels_per_tick: u32) -> BusterContext {
    let config = BusterConfig {
        levels_per_tick,
        stop_level: 1,
        ..Default::default()
    };
    BusterContext::new(world, config).expect("bench config is valid")
}

fn bench_forward_tick(c: &mut Criterion) {
    c.bench_function("forward_tick_4_regions_4_levels", |b| {
        b.iter_batched(
            || {
                let (world, regions) = terrain(4, 16);
                let task = BusterTask::new(TaskId(1), OwnerId::random(), "buster", regions, 16, true);
                (context(world, 4), task)
            },
            |(ctx, mut task)| black_box(task.tick(&ctx)),
            BatchSize::SmallInput,
        );
    });
}

fn bench_reverse_tick(c: &mut Criterion) {
    c.bench_function("reverse_tick_4_regions_4_levels", |b| {
        b.iter_batched(
            || {
                let (world, regions) = terrain(4, 16);
                let ctx = context(world, 4);
                let mut task = BusterTask::new(TaskId(1), OwnerId::random(), "buster", regions, 16, true);
                task.tick(&ctx);
                let owner = task.owner();
                let _ = task.request_cancel(&owner, &ctx);
                (ctx, task)
            },
            |(ctx, mut task)| black_box(task.tick(&ctx)),
            BatchSize::SmallInput,
        );
    });
}

fn bench_highest_level(c: &mut Criterion) {
    let (world, regions) = terrain(64, 96);
    let snapshots: Vec<_> = regions.iter().map(|region| world.snapshot_region(*region)).collect();

    c.bench_function("highest_occupied_level_64_regions", |b| {
        b.iter(|| LevelScanner::highest_occupied_level(black_box(&snapshots)));
    });
}

criterion_group!(benches, bench_forward_tick, bench_reverse_tick, bench_highest_level);
criterion_main!(benches);
