//! Demo components: a patrol bot that rests, closes in and fights.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tickwork_core::DurationExt;
use tickwork_logic::{
    Branch, BranchContext, Flow, FlowContext, LogicRegistration, RootBranch,
};
use tickwork_scope::{Param, Registration, Scope, ScopeBuilder};
use tracing::info;

const NO_ENEMY: u32 = u32::MAX;

/// Something that writes readings into the blackboard.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &'static str;
    fn sample(&self, step: u64, board: &Blackboard);
}

/// Shared world state, refreshed once per tick.
pub struct Blackboard {
    sensors: Vec<Arc<dyn Sensor>>,
    step: AtomicU64,
    enemy_distance: AtomicU32,
    stamina: AtomicU32,
}

impl Blackboard {
    fn new(sensors: Vec<Arc<dyn Sensor>>) -> Self {
        let names: Vec<_> = sensors.iter().map(|s| s.name()).collect();
        info!("Blackboard wired to sensors: {}", names.join(", "));

        Self {
            sensors,
            step: AtomicU64::new(0),
            enemy_distance: AtomicU32::new(NO_ENEMY),
            stamina: AtomicU32::new(100),
        }
    }

    fn refresh(&self) {
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        for sensor in &self.sensors {
            sensor.sample(step, self);
        }
    }

    pub fn enemy_distance(&self) -> Option<u32> {
        match self.enemy_distance.load(Ordering::SeqCst) {
            NO_ENEMY => None,
            d => Some(d),
        }
    }

    pub fn stamina(&self) -> u32 {
        self.stamina.load(Ordering::SeqCst)
    }
}

// === Sensors ===

/// Reports an enemy that shows up at step 30 and closes in.
#[derive(Default)]
struct Radar;

impl Sensor for Radar {
    fn name(&self) -> &'static str {
        "radar"
    }

    fn sample(&self, step: u64, board: &Blackboard) {
        let distance = match step {
            30..=59 => 30u32.saturating_sub((step as u32 - 30) * 2),
            _ => NO_ENEMY,
        };
        board.enemy_distance.store(distance, Ordering::SeqCst);
    }
}

/// Stamina drains while active and recovers after step 80.
#[derive(Default)]
struct StaminaGauge;

impl Sensor for StaminaGauge {
    fn name(&self) -> &'static str {
        "stamina"
    }

    fn sample(&self, step: u64, board: &Blackboard) {
        let current = board.stamina();
        let next = if step < 80 {
            current.saturating_sub(1)
        } else {
            (current + 5).min(100)
        };
        board.stamina.store(next, Ordering::SeqCst);
    }
}

// === Branches ===

struct Brain {
    board: Arc<Blackboard>,
}

impl Branch for Brain {
    fn tick(&self, ctx: &mut BranchContext<'_>) -> anyhow::Result<()> {
        self.board.refresh();

        if self.board.enemy_distance().is_some() {
            ctx.activate::<Combat>();
        } else if self.board.stamina() < 30 {
            ctx.activate::<Rest>();
        } else {
            ctx.activate::<Patrol>();
        }
        Ok(())
    }
}

impl RootBranch for Brain {}

struct Combat {
    board: Arc<Blackboard>,
}

impl Branch for Combat {
    fn tick(&self, ctx: &mut BranchContext<'_>) -> anyhow::Result<()> {
        match self.board.enemy_distance() {
            Some(d) if d > 6 => ctx.activate::<Approach>(),
            Some(_) => ctx.activate::<Engage>(),
            None => anyhow::bail!("combat evaluated without an enemy"),
        }
        Ok(())
    }
}

// === Flows ===

struct Patrol;

#[async_trait]
impl Flow for Patrol {
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()> {
        for waypoint in ["gate", "tower", "well", "barracks"] {
            info!("Patrolling to {}", waypoint);
            ctx.delay(400.ms()).await?;
        }
        info!("Patrol route complete");
        Ok(())
    }
}

struct Rest {
    board: Arc<Blackboard>,
}

#[async_trait]
impl Flow for Rest {
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()> {
        info!("Resting at {} stamina", self.board.stamina());
        let board = self.board.clone();
        ctx.until_timeout(move || board.stamina() >= 90, 10.seconds())
            .await?;
        info!("Rested");
        Ok(())
    }
}

struct Approach {
    board: Arc<Blackboard>,
}

#[async_trait]
impl Flow for Approach {
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()> {
        loop {
            if let Some(d) = self.board.enemy_distance() {
                info!("Closing in, enemy at {}m", d);
            }
            ctx.delay(250.ms()).await?;
        }
    }
}

struct Engage {
    board: Arc<Blackboard>,
}

#[async_trait]
impl Flow for Engage {
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()> {
        info!("Engaging at {}m", self.board.enemy_distance().unwrap_or_default());
        ctx.run_child::<Strike>().await?;
        ctx.run_child::<Strike>().await?;
        info!("Enemy down");
        Ok(())
    }

    fn on_cancel(&self) -> anyhow::Result<()> {
        info!("Disengaging");
        Ok(())
    }
}

struct Strike;

#[async_trait]
impl Flow for Strike {
    async fn run(&self, ctx: &FlowContext) -> anyhow::Result<()> {
        info!("Strike");
        ctx.delay(300.ms()).await?;
        Ok(())
    }
}

fn on_board<T, F>(reg: Registration<T>, make: F) -> Registration<T>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<Blackboard>) -> T + Send + Sync + 'static,
{
    reg.constructor(vec![Param::one::<Blackboard>()], move |args| {
        Ok(make(args.one::<Blackboard>()?))
    })
}

/// Manifest of every demo component.
pub fn manifest() -> ScopeBuilder {
    Scope::builder()
        .register(
            Registration::<Radar>::singleton()
                .display_name("Enemy radar")
                .implements::<dyn Sensor, _>(|s: Arc<Radar>| -> Arc<dyn Sensor> { s })
                .with_default(),
        )
        .register(
            Registration::<StaminaGauge>::singleton()
                .priority(10)
                .implements::<dyn Sensor, _>(|s: Arc<StaminaGauge>| -> Arc<dyn Sensor> { s })
                .with_default(),
        )
        .register(
            Registration::<Blackboard>::singleton()
                .constructor(vec![Param::all::<dyn Sensor>()], |args| {
                    Ok(Blackboard::new(args.all::<dyn Sensor>()?))
                }),
        )
        .register(on_board(Registration::<Brain>::singleton().root_branch(), |board| Brain { board }))
        .register(on_board(Registration::<Combat>::singleton().branch(), |board| Combat { board }))
        .register(
            Registration::<Patrol>::prototype()
                .flow()
                .constructor(vec![], |_| Ok(Patrol)),
        )
        .register(on_board(Registration::<Rest>::prototype().flow(), |board| Rest { board }))
        .register(on_board(Registration::<Approach>::prototype().flow(), |board| Approach { board }))
        .register(on_board(Registration::<Engage>::prototype().flow(), |board| Engage { board }))
        .register(
            Registration::<Strike>::prototype()
                .flow()
                .constructor(vec![], |_| Ok(Strike)),
        )
}
