use spacetimedb::{Identity, Timestamp, ReducerContext, Table};
use log;

mod models;
mod utils;
mod items;
mod config;
mod permissions;
mod yield_modifier;
mod loot_container;
mod dropped_item;
mod reducer_host;
pub mod auto_pickup; // Damage hook: eligibility, transfer and despawn queueing
pub mod container_despawn;
pub mod combat;

// --- Global Constants ---
pub const TILE_SIZE_PX: u32 = 48;
pub const WORLD_WIDTH_TILES: u32 = 500;
pub const WORLD_HEIGHT_TILES: u32 = 500;
pub const WORLD_WIDTH_PX: f32 = (WORLD_WIDTH_TILES * TILE_SIZE_PX) as f32;
pub const WORLD_HEIGHT_PX: f32 = (WORLD_HEIGHT_TILES * TILE_SIZE_PX) as f32;

pub const PLAYER_SPEED: f32 = 600.0; // Speed in pixels per second
/// Slack on the speed check for network jitter.
const MOVEMENT_TOLERANCE: f32 = 1.5;
const MAX_USERNAME_LEN: usize = 32;

// Player table to store position
#[spacetimedb::table(
    name = player,
    public,
    index(name = idx_player_pos, btree(columns = [position_x, position_y]))
)]
#[derive(Clone)]
pub struct Player {
    #[primary_key]
    pub identity: Identity,
    pub username: String,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32, // Elevation
    pub last_update: Timestamp,
    pub is_online: bool,
}

// --- Lifecycle Reducers ---

// Called once when the module is published or updated
#[spacetimedb::reducer(init)]
pub fn init_module(ctx: &ReducerContext) -> Result<(), String> {
    log::info!("Initializing module...");

    crate::config::init_plugin_config(ctx)?;
    crate::permissions::init_permissions(ctx)?;
    crate::dropped_item::init_dropped_item_schedule(ctx)?;
    crate::container_despawn::init_death_notice_sweep(ctx)?;
    crate::loot_container::seed_loot_containers(ctx)?;

    log::info!("Module initialization complete.");
    Ok(())
}

#[spacetimedb::reducer(client_connected)]
pub fn identity_connected(ctx: &ReducerContext) -> Result<(), String> {
    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&ctx.sender) {
        if !player.is_online {
            player.is_online = true;
            players.identity().update(player);
            log::info!("[Connect] Set player {:?} to online.", ctx.sender);
        }
    } else {
        // Player might not be registered yet, which is fine. is_online will be set during registration.
        log::debug!("[Connect] Player {:?} not found in Player table yet (likely needs registration).", ctx.sender);
    }
    Ok(())
}

#[spacetimedb::reducer(client_disconnected)]
pub fn identity_disconnected(ctx: &ReducerContext) {
    let players = ctx.db.player();
    if let Some(mut player) = players.identity().find(&ctx.sender) {
        if player.is_online {
            player.is_online = false;
            players.identity().update(player);
            log::info!("[Disconnect] Set player {:?} to offline.", ctx.sender);
        }
    }
}

// Register a new player, or refresh an existing one
#[spacetimedb::reducer]
pub fn register_player(ctx: &ReducerContext, username: String) -> Result<(), String> {
    let sender_id = ctx.sender;
    let players = ctx.db.player();
    log::info!("Attempting registration/login for identity: {:?}, username: {}", sender_id, username);

    if let Some(mut existing_player) = players.identity().find(&sender_id) {
        existing_player.last_update = ctx.timestamp;
        existing_player.is_online = true;
        players.identity().update(existing_player);
        return Ok(());
    }

    let username = username.trim().to_string();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(format!("Username must be 1-{} characters.", MAX_USERNAME_LEN));
    }
    if players.iter().any(|p| p.username == username) {
        log::warn!("Username '{}' already taken by another player. Registration failed for {:?}.", username, sender_id);
        return Err(format!("Username '{}' is already taken.", username));
    }

    let player = Player {
        identity: sender_id,
        username: username.clone(),
        position_x: WORLD_WIDTH_PX / 2.0,
        position_y: WORLD_HEIGHT_PX / 2.0,
        position_z: 0.0,
        last_update: ctx.timestamp,
        is_online: true,
    };
    match players.try_insert(player) {
        Ok(_) => {
            log::info!("Player registered: {}.", username);
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to insert new player {} ({:?}): {}", username, sender_id, e);
            Err("Failed to register player: Database error.".to_string())
        }
    }
}

/// Moves the sender to an absolute position. Rejects moves faster than the player can run.
#[spacetimedb::reducer]
pub fn update_player_position(ctx: &ReducerContext, pos_x: f32, pos_y: f32, pos_z: f32) -> Result<(), String> {
    let players = ctx.db.player();
    let mut player = players.identity().find(&ctx.sender)
        .ok_or_else(|| "Player not found".to_string())?;

    if !(pos_x.is_finite() && pos_y.is_finite() && pos_z.is_finite()) {
        return Err("Invalid position.".to_string());
    }
    let clamped_x = pos_x.clamp(0.0, WORLD_WIDTH_PX);
    let clamped_y = pos_y.clamp(0.0, WORLD_HEIGHT_PX);

    let elapsed_micros = ctx.timestamp.to_micros_since_unix_epoch()
        .saturating_sub(player.last_update.to_micros_since_unix_epoch());
    let elapsed_secs = (elapsed_micros as f32 / 1_000_000.0).max(0.0);
    let max_step = PLAYER_SPEED * elapsed_secs * MOVEMENT_TOLERANCE;
    let step = crate::utils::planar_distance(player.position_x, player.position_y, clamped_x, clamped_y);
    if step > max_step {
        log::warn!("[Movement] Rejected move of {:.1}px in {:.3}s for {:?}", step, elapsed_secs, ctx.sender);
        return Err("Moved too far.".to_string());
    }

    player.position_x = clamped_x;
    player.position_y = clamped_y;
    player.position_z = pos_z;
    player.last_update = ctx.timestamp;
    players.identity().update(player);
    Ok(())
}
