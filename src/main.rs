//! voxbust demo: bust a patch of generated terrain with an operator console.
//!
//! ```text
//! voxbust [--config busters.json] [--radius 1] [--height 64] [--state tasks.vxbt] [--port 9743]
//! ```
//!
//! Ctrl-C persists unfinished busters to `--state` so the next run resumes
//! them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use voxbust::buster::{
    persist, BusterConfig, BusterContext, BusterEngine, PrimaryContext, TaskHandle, TaskId,
    TaskPhase, TaskScheduler,
};
use voxbust::core::logging;
use voxbust::core::types::Result;
use voxbust::world::{BlockData, InventoryRef, Material, MemoryWorld, OwnerId, Region, WorldId};
use voxbust_debug::{DebugCommand, DebugHandler, DebugResponse, DebugServer, ResponseData, TaskInfo};

const KIND: &str = "buster";

struct ConsoleHandler {
    engine: BusterEngine,
}

impl DebugHandler for ConsoleHandler {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse {
        match cmd {
            DebugCommand::Ping => DebugResponse::pong(),

            DebugCommand::ListTasks => DebugResponse::ok(ResponseData::Tasks {
                tasks: self.engine.tasks().iter().map(|handle| task_info(handle)).collect(),
            }),

            DebugCommand::TaskStatus { id } => match self.engine.task(TaskId(id)) {
                Some(handle) => DebugResponse::ok(ResponseData::Task { task: task_info(&handle) }),
                None => DebugResponse::error(format!("No task #{}", id)),
            },

            DebugCommand::Cancel { id, requester } => {
                let Some(handle) = self.engine.task(TaskId(id)) else {
                    return DebugResponse::error(format!("No task #{}", id));
                };
                let Some(requester) = parse_owner(&requester) else {
                    return DebugResponse::error(format!("Invalid owner id: {}", requester));
                };
                match self.engine.request_cancel(&handle, &requester) {
                    Ok(()) => DebugResponse::updated(format!("Task #{} reversing", id)),
                    Err(e) => DebugResponse::error(e.to_string()),
                }
            }

            DebugCommand::SetWatched { owner, id } => {
                let Some(owner) = parse_owner(&owner) else {
                    return DebugResponse::error(format!("Invalid owner id: {}", owner));
                };
                match self.engine.set_watched(owner, TaskId(id)) {
                    Ok(()) => DebugResponse::updated(format!("{} now watches task #{}", owner, id)),
                    Err(e) => DebugResponse::error(e.to_string()),
                }
            }
        }
    }
}

fn task_info(handle: &TaskHandle) -> TaskInfo {
    let phase = match handle.phase() {
        TaskPhase::Forward => "forward",
        TaskPhase::Reverse => "reverse",
        TaskPhase::Finished(_) => "finished",
    };
    TaskInfo {
        id: handle.id().0,
        owner: handle.owner().to_string(),
        kind: handle.kind(),
        level: handle.current_level(),
        phase: phase.to_string(),
        regions: handle.regions().len(),
        logged_voxels: handle.logged_voxels(),
    }
}

fn parse_owner(text: &str) -> Option<OwnerId> {
    uuid::Uuid::parse_str(text).ok().map(OwnerId)
}

/// Fill every region within `radius` of the origin with layered terrain
/// topped at `height`, plus a chest in the middle of each region.
fn generate_terrain(world: &MemoryWorld, radius: i32, height: i32) -> Vec<Region> {
    let w = WorldId(0);
    let bedrock = BlockData::new(Material::new("BEDROCK"), 0);
    let stone = BlockData::new(Material::new("STONE"), 0);
    let dirt = BlockData::new(Material::new("DIRT"), 0);
    let grass = BlockData::new(Material::new("GRASS_BLOCK"), 0);

    let mut regions = Vec::new();
    let mut chests = 0;
    for x in -radius..=radius {
        for z in -radius..=radius {
            let region = Region::new(w, x, z);
            world.fill(region, 0..=0, &bedrock);
            world.fill(region, 1..=height - 4, &stone);
            world.fill(region, height - 3..=height - 1, &dirt);
            world.fill(region, height..=height, &grass);

            let chest = region.voxel(8, height, 8);
            world.set_block(chest, BlockData::new(Material::new("CHEST"), 2));
            world.set_inventory(chest, InventoryRef(chests));
            chests += 1;

            regions.push(region);
        }
    }

    log::info!("Generated {} regions of terrain, {} levels high", regions.len(), height);
    regions
}

/// Resume persisted busters, or start a fresh one over every region.
async fn start_tasks(
    engine: &BusterEngine,
    state_path: Option<&Path>,
    regions: Vec<Region>,
) -> Result<Vec<Arc<TaskHandle>>> {
    if let Some(path) = state_path {
        let states = persist::load_tasks(path).await?;
        if !states.is_empty() {
            return states.into_iter().map(|state| engine.resume(state)).collect();
        }
    }

    let owner = OwnerId::random();
    log::info!("Starting buster for {}", owner);
    Ok(vec![engine.create_default(owner, regions, KIND)?])
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_path_arg(&args, "--config") {
        Some(path) => {
            log::info!("Loading config from: {}", path.display());
            BusterConfig::load_sync(&path)?
        }
        None => BusterConfig::default(),
    };
    let radius = parse_arg(&args, "--radius").unwrap_or(1);
    let height = parse_arg(&args, "--height").unwrap_or(64);
    let port = parse_arg(&args, "--port").unwrap_or(voxbust_debug::DEFAULT_PORT);
    let state_path = parse_path_arg(&args, "--state");

    let world = Arc::new(MemoryWorld::new());
    let regions = generate_terrain(&world, radius, height);

    let (primary, queue) = PrimaryContext::channel();
    tokio::spawn(queue.run());
    let ctx = BusterContext::new(world.clone(), config)?;
    let engine = BusterEngine::new(ctx, TaskScheduler::current(primary));

    let handler = Arc::new(tokio::sync::Mutex::new(ConsoleHandler {
        engine: engine.clone(),
    }));
    let _server = DebugServer::start(handler, port);

    let handles = start_tasks(&engine, state_path.as_deref(), regions).await?;
    for handle in &handles {
        log::info!("Task {} running, console on port {}", handle.id(), port);
    }

    tokio::select! {
        _ = async {
            for handle in &handles {
                handle.wait_finished().await;
            }
        } => {
            log::info!("All busters finished, {} voxel writes", world.write_count());
        }
        _ = tokio::signal::ctrl_c() => {
            let states = engine.snapshot_all();
            match &state_path {
                Some(path) => {
                    persist::save_tasks(path, &states).await?;
                    log::info!("Saved {} unfinished busters", states.len());
                }
                None => log::warn!("No --state file given, dropping {} unfinished busters", states.len()),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init();
    log::info!("voxbust starting...");

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

/// Parse a `--flag value` argument
fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    for i in 0..args.len() {
        if args[i] == flag {
            if let Some(value) = args.get(i + 1) {
                return value.parse().ok();
            }
        }
    }
    None
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<PathBuf> {
    parse_arg::<String>(args, flag).map(PathBuf::from)
}
