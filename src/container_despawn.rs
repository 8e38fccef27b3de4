/******************************************************************************
 *                                                                            *
 * Deferred destruction of containers emptied by auto pickup. The pickup     *
 * queues a one-shot job for the next tick so the container is not removed  *
 * while the damage reducer is still working with it. The job optionally    *
 * publishes an entity death notice and then destroys the container, with   *
 * or without debris.                                                        *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, SpacetimeType, Table, Timestamp};
use spacetimedb::spacetimedb_lib::ScheduleAt;
use log;
use std::time::Duration;

use crate::config::current_config;
use crate::models::{ContainerCategory, DestroyMode};
use crate::permissions::{PermissionFlag, PermissionService};
use crate::reducer_host::ReducerHost;

/// Everything the deferred step needs, captured when the container was emptied.
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct DespawnJob {
    pub container_id: u64,
    pub actor: Identity,
    pub category: ContainerCategory,
    pub initiator: Option<Identity>,
    pub total_damage: f32,
}

/// Queues work for after the current event has finished.
pub trait TickScheduler {
    fn schedule_next_tick(&mut self, job: DespawnJob) -> Result<(), String>;
}

/// Container liveness, death notices and removal.
pub trait ContainerLifecycle {
    fn is_container_live(&self, container_id: u64) -> bool;
    /// Called once the despawn job has been queued.
    fn mark_despawn_pending(&mut self, container_id: u64);
    fn broadcast_entity_death(&mut self, job: &DespawnJob);
    /// Returns false when the container was already gone.
    fn destroy_container(&mut self, container_id: u64, mode: DestroyMode) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DespawnOutcome {
    Destroyed(DestroyMode),
    AlreadyGone,
}

pub fn destroy_mode_for<H: PermissionService>(host: &H, job: &DespawnJob) -> DestroyMode {
    if host.has_flag(&job.actor, job.category, PermissionFlag::NoGibs) {
        DestroyMode::Clean
    } else {
        DestroyMode::Gib
    }
}

/// Runs a despawn job. A container removed in the meantime is a no-op.
pub fn run_despawn<H>(host: &mut H, job: &DespawnJob, broadcast_entity_death: bool) -> DespawnOutcome
where
    H: PermissionService + ContainerLifecycle,
{
    if !host.is_container_live(job.container_id) {
        log::debug!("[Despawn] Container {} already gone.", job.container_id);
        return DespawnOutcome::AlreadyGone;
    }

    if broadcast_entity_death {
        host.broadcast_entity_death(job);
    }

    let mode = destroy_mode_for(host, job);
    if host.destroy_container(job.container_id, mode) {
        DespawnOutcome::Destroyed(mode)
    } else {
        DespawnOutcome::AlreadyGone
    }
}

// --- Schedule Table ---

#[spacetimedb::table(name = container_despawn_schedule, scheduled(process_container_despawn))]
#[derive(Clone)]
pub struct ContainerDespawnSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub job: DespawnJob,
    pub scheduled_at: ScheduleAt,
}

/// Public record that a container died, for clients and other modules to react to.
#[spacetimedb::table(name = container_death_notice, public)]
#[derive(Clone, Debug)]
pub struct ContainerDeathNotice {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub container_id: u64,
    pub prefab_name: String,
    pub category: ContainerCategory,
    pub pos_x: f32,
    pub pos_y: f32,
    pub killer: Identity,
    pub initiator: Option<Identity>,
    pub total_damage: f32,
    pub died_at: Timestamp,
}

// Death notices are fire-and-forget: clients see the insert, then the sweep drops them.
const DEATH_NOTICE_SWEEP_INTERVAL_SECS: u64 = 30;
const DEATH_NOTICE_LIFETIME_SECS: i64 = 10;

#[spacetimedb::table(name = death_notice_sweep_schedule, scheduled(prune_death_notices))]
#[derive(Clone)]
pub struct DeathNoticeSweepSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub scheduled_at: ScheduleAt,
}

pub(crate) fn is_notice_expired(died_at: Timestamp, now: Timestamp) -> bool {
    let elapsed_micros = now.to_micros_since_unix_epoch()
        .saturating_sub(died_at.to_micros_since_unix_epoch());
    elapsed_micros / 1_000_000 >= DEATH_NOTICE_LIFETIME_SECS
}

/// Scheduled reducer that deletes death notices clients have had time to see.
#[spacetimedb::reducer]
pub fn prune_death_notices(ctx: &ReducerContext, _schedule: DeathNoticeSweepSchedule) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("prune_death_notices can only be called by the scheduler".to_string());
    }

    let notices = ctx.db.container_death_notice();
    let expired: Vec<u64> = notices.iter()
        .filter(|notice| is_notice_expired(notice.died_at, ctx.timestamp))
        .map(|notice| notice.id)
        .collect();
    for id in &expired {
        notices.id().delete(id);
    }
    if !expired.is_empty() {
        log::debug!("[Despawn] Pruned {} death notices.", expired.len());
    }
    Ok(())
}

pub(crate) fn init_death_notice_sweep(ctx: &ReducerContext) -> Result<(), String> {
    let schedule_table = ctx.db.death_notice_sweep_schedule();
    if schedule_table.iter().count() == 0 {
        log::info!("[Despawn] Starting death notice sweep (every {}s).", DEATH_NOTICE_SWEEP_INTERVAL_SECS);
        schedule_table.try_insert(DeathNoticeSweepSchedule {
            id: 0,
            scheduled_at: ScheduleAt::Interval(Duration::from_secs(DEATH_NOTICE_SWEEP_INTERVAL_SECS).into()),
        }).map_err(|e| format!("Failed to start death notice sweep: {}", e))?;
    }
    Ok(())
}

/// Inserts a schedule row that fires at the current timestamp, i.e. right after this transaction.
pub(crate) fn schedule_container_despawn(ctx: &ReducerContext, job: DespawnJob) -> Result<(), String> {
    let container_id = job.container_id;
    ctx.db.container_despawn_schedule().try_insert(ContainerDespawnSchedule {
        id: 0,
        job,
        scheduled_at: ctx.timestamp.into(),
    }).map_err(|e| format!("Failed to schedule despawn of container {}: {}", container_id, e))?;
    log::debug!("[Despawn] Container {} queued for next tick.", container_id);
    Ok(())
}

#[spacetimedb::reducer]
pub fn process_container_despawn(ctx: &ReducerContext, args: ContainerDespawnSchedule) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("process_container_despawn can only be called by the scheduler".to_string());
    }

    let config = current_config(ctx);
    let mut host = ReducerHost::new(ctx);
    match run_despawn(&mut host, &args.job, config.broadcast_entity_death) {
        DespawnOutcome::Destroyed(mode) => {
            log::info!("[Despawn] Container {} destroyed ({:?}).", args.job.container_id, mode);
        }
        DespawnOutcome::AlreadyGone => {}
    }
    // The schedule row is removed by SpacetimeDB once this reducer runs.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_pickup::test_support::*;
    use crate::auto_pickup::{on_entity_take_damage, DamageEvent, HookResult};
    use crate::config::AutoPickupConfig;

    fn job(actor: Identity) -> DespawnJob {
        DespawnJob {
            container_id: 7,
            actor,
            category: ContainerCategory::Barrel,
            initiator: Some(actor),
            total_damage: 12.0,
        }
    }

    #[test]
    fn destroys_with_gibs_by_default() {
        let player = identity(1);
        let mut host = FakeHost::default();
        host.containers.insert(7, vec![]);

        let outcome = run_despawn(&mut host, &job(player), true);

        assert_eq!(outcome, DespawnOutcome::Destroyed(DestroyMode::Gib));
        assert_eq!(host.destroyed, vec![(7, DestroyMode::Gib)]);
        assert_eq!(host.death_notices, vec![job(player)]);
    }

    #[test]
    fn no_gibs_permission_destroys_cleanly() {
        let player = identity(1);
        let mut host = FakeHost::default();
        host.containers.insert(7, vec![]);
        host.grant(player, "Barrel.NoGibs");

        assert_eq!(run_despawn(&mut host, &job(player), true), DespawnOutcome::Destroyed(DestroyMode::Clean));
    }

    #[test]
    fn broadcast_can_be_disabled() {
        let player = identity(1);
        let mut host = FakeHost::default();
        host.containers.insert(7, vec![]);

        run_despawn(&mut host, &job(player), false);

        assert!(host.death_notices.is_empty());
        assert_eq!(host.destroyed.len(), 1);
    }

    #[test]
    fn already_removed_container_is_a_no_op() {
        let player = identity(1);
        let mut host = FakeHost::default();

        assert_eq!(run_despawn(&mut host, &job(player), true), DespawnOutcome::AlreadyGone);
        assert!(host.destroyed.is_empty());
        assert!(host.death_notices.is_empty());
    }

    #[test]
    fn death_notices_expire_after_their_lifetime() {
        let died_at = Timestamp::from_micros_since_unix_epoch(1_000_000_000);
        let later = |secs: i64| Timestamp::from_micros_since_unix_epoch(1_000_000_000 + secs * 1_000_000);

        assert!(!is_notice_expired(died_at, died_at));
        assert!(!is_notice_expired(died_at, later(DEATH_NOTICE_LIFETIME_SECS - 1)));
        assert!(is_notice_expired(died_at, later(DEATH_NOTICE_LIFETIME_SECS)));
        assert!(is_notice_expired(died_at, later(3600)));
    }

    #[test]
    fn notices_from_the_future_are_kept() {
        let now = Timestamp::from_micros_since_unix_epoch(1_000_000_000);
        let ahead = Timestamp::from_micros_since_unix_epoch(2_000_000_000);
        assert!(!is_notice_expired(ahead, now));
    }

    #[test]
    fn second_run_does_not_destroy_twice() {
        let player = identity(1);
        let mut host = FakeHost::default();
        host.containers.insert(7, vec![]);

        run_despawn(&mut host, &job(player), true);
        assert_eq!(run_despawn(&mut host, &job(player), true), DespawnOutcome::AlreadyGone);
        assert_eq!(host.destroyed.len(), 1);
    }

    #[test]
    fn barrel_hit_end_to_end() {
        let player = identity(1);
        let mut host = FakeHost::default();
        host.add_actor(player, 1.0, 0.0);
        host.grant(player, "Barrel.On");
        host.containers.insert(7, vec![stack(100, "wood", 100)]);
        let barrel = container(7, "loot_barrel_2", 10.0);
        let hit = DamageEvent { container_id: 7, initiator: Some(player), total_damage: 12.0 };
        let config = AutoPickupConfig { auto_pickup_distance: 3.0, ..AutoPickupConfig::default() };

        let result = on_entity_take_damage(&mut host, &config, Some(&barrel), Some(&hit));
        assert_eq!(result, HookResult::Suppress);
        assert_eq!(host.items_of(&player), vec![stack(100, "wood", 100)]);
        // Nothing is destroyed until the next tick runs the queued job.
        assert!(host.destroyed.is_empty());

        let queued = host.scheduled.pop().expect("despawn should be queued");
        assert_eq!(run_despawn(&mut host, &queued, config.broadcast_entity_death), DespawnOutcome::Destroyed(DestroyMode::Gib));
        assert_eq!(host.destroyed, vec![(7, DestroyMode::Gib)]);
    }
}
