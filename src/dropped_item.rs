use spacetimedb::{ReducerContext, Table, Timestamp};
use log;
use spacetimedb::spacetimedb_lib::ScheduleAt;
use std::time::Duration;

use crate::player as PlayerTableTrait;
use crate::utils::get_distance_squared;

// Define the table for items dropped in the world
#[spacetimedb::table(name = dropped_item, public)]
#[derive(Clone, Debug)]
pub struct DroppedItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub item_name: String,
    pub quantity: u32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub created_at: Timestamp, // For the despawn sweep
}

// --- Schedule Table ---
#[spacetimedb::table(name = dropped_item_despawn_schedule, scheduled(despawn_expired_items))]
#[derive(Clone)]
pub struct DroppedItemDespawnSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub scheduled_at: ScheduleAt,
}

// Constants
const PICKUP_RADIUS: f32 = 64.0;
const PICKUP_RADIUS_SQUARED: f32 = PICKUP_RADIUS * PICKUP_RADIUS;
const DESPAWN_CHECK_INTERVAL_SECS: u64 = 60;
const DROPPED_ITEM_LIFETIME_SECS: i64 = 300;
pub(crate) const DROP_SCATTER_RADIUS: f32 = 24.0;

// --- Reducers ---

/// Called by the client when they attempt to pick up a dropped item.
#[spacetimedb::reducer]
pub fn pickup_dropped_item(ctx: &ReducerContext, dropped_item_id: u64) -> Result<(), String> {
    let sender_id = ctx.sender;
    let dropped_items_table = ctx.db.dropped_item();

    let player = ctx.db.player().identity().find(sender_id)
        .ok_or_else(|| "Player not found.".to_string())?;
    let dropped_item = dropped_items_table.id().find(dropped_item_id)
        .ok_or_else(|| format!("Dropped item with ID {} not found.", dropped_item_id))?;

    let distance_sq = get_distance_squared(player.position_x, player.position_y, dropped_item.pos_x, dropped_item.pos_y);
    if distance_sq > PICKUP_RADIUS_SQUARED {
        log::warn!("[PickupDropped] Player {:?} too far from item {} (DistSq: {:.1} > {:.1})",
                   sender_id, dropped_item_id, distance_sq, PICKUP_RADIUS_SQUARED);
        return Err("Too far away to pick up the item.".to_string());
    }

    crate::items::add_item_to_player_inventory(ctx, sender_id, &dropped_item.item_name, dropped_item.quantity)?;
    dropped_items_table.id().delete(dropped_item_id);
    log::info!("[PickupDropped] Player {:?} picked up {} x{} (dropped item {}).",
             sender_id, dropped_item.item_name, dropped_item.quantity, dropped_item_id);
    Ok(())
}

// --- Scheduled Despawn Reducer ---

/// Scheduled reducer that runs periodically to remove expired dropped items.
#[spacetimedb::reducer]
pub fn despawn_expired_items(ctx: &ReducerContext, _schedule: DroppedItemDespawnSchedule) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("despawn_expired_items can only be called by the scheduler".to_string());
    }

    let current_time = ctx.timestamp;
    let dropped_items_table = ctx.db.dropped_item();

    let expired: Vec<u64> = dropped_items_table.iter()
        .filter(|item| {
            let elapsed_micros = current_time.to_micros_since_unix_epoch()
                .saturating_sub(item.created_at.to_micros_since_unix_epoch());
            elapsed_micros / 1_000_000 >= DROPPED_ITEM_LIFETIME_SECS
        })
        .map(|item| item.id)
        .collect();

    for item_id in &expired {
        dropped_items_table.id().delete(item_id);
    }
    if !expired.is_empty() {
        log::info!("[DespawnCheck] Despawned {} dropped items.", expired.len());
    }
    Ok(())
}

// --- Helper Functions ---

/// Creates a DroppedItem entity in the world.
pub(crate) fn create_dropped_item_entity(
    ctx: &ReducerContext,
    item_name: &str,
    quantity: u32,
    pos_x: f32,
    pos_y: f32,
) -> Result<(), String> {
    let new_dropped_item = DroppedItem {
        id: 0,
        item_name: item_name.to_string(),
        quantity,
        pos_x,
        pos_y,
        created_at: ctx.timestamp,
    };

    match ctx.db.dropped_item().try_insert(new_dropped_item) {
        Ok(_) => {
            log::debug!("[CreateDroppedItem] Dropped {} x{} at ({:.1}, {:.1})", item_name, quantity, pos_x, pos_y);
            Ok(())
        }
        Err(e) => {
            log::error!("[CreateDroppedItem] Failed to insert dropped item: {}", e);
            Err(format!("Failed to create dropped item entity: {}", e))
        }
    }
}

// --- Init Helper (Called from lib.rs) ---
pub(crate) fn init_dropped_item_schedule(ctx: &ReducerContext) -> Result<(), String> {
    let schedule_table = ctx.db.dropped_item_despawn_schedule();
    if schedule_table.iter().count() == 0 {
        log::info!("Starting dropped item despawn schedule (every {}s).", DESPAWN_CHECK_INTERVAL_SECS);
        let interval = Duration::from_secs(DESPAWN_CHECK_INTERVAL_SECS);
        schedule_table.insert(DroppedItemDespawnSchedule {
            id: 0,
            scheduled_at: ScheduleAt::Interval(interval.into()),
        });
    } else {
        log::debug!("Dropped item despawn schedule already exists.");
    }
    Ok(())
}
