/******************************************************************************
 *                                                                            *
 * Defines the LootContainer entity: barrels and road signs scattered around *
 * the world that hold a few stacks of loot. Provides the prefab classifier  *
 * used by auto pickup, the per-category loot tables and world seeding.      *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table, Timestamp};
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use log;

use crate::items::{add_item_to_container, SCRAP_ITEM_NAME};
use crate::models::ContainerCategory;
use crate::{WORLD_WIDTH_PX, WORLD_HEIGHT_PX};

// --- Constants ---
pub const BARREL_PREFAB_NAMES: [&str; 5] = ["loot_barrel_1", "loot_barrel_2", "loot-barrel-1", "loot-barrel-2", "oil_barrel"];
pub const ROAD_SIGN_PREFAB_NAMES: [&str; 9] = [
    "roadsign1", "roadsign2", "roadsign3", "roadsign4", "roadsign5",
    "roadsign6", "roadsign7", "roadsign8", "roadsign9",
];

pub(crate) const BARREL_MAX_HEALTH: f32 = 50.0;
pub(crate) const ROAD_SIGN_MAX_HEALTH: f32 = 100.0;
const SEED_BARREL_COUNT: u32 = 60;
const SEED_ROAD_SIGN_COUNT: u32 = 30;

/// --- Loot Container Data Structure ---
/// A destructible world object holding lootable items. Its inventory is the set of
/// `InventoryItem` rows located in this container.
#[spacetimedb::table(name = loot_container, public)]
#[derive(Clone, Debug)]
pub struct LootContainer {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub prefab_name: String,

    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32, // Elevation, not used for range checks

    pub health: f32,
    pub max_health: f32,
    pub last_attacker: Option<Identity>, // Set by default damage handling
    pub last_hit_time: Option<Timestamp>,

    pub despawn_pending: bool, // Emptied by auto pickup, waiting for the next tick
    pub is_destroyed: bool,
    pub destroyed_with_gibs: bool,
}

/// Maps a prefab short name to its category. `None` means the prefab is not a
/// container auto pickup cares about.
pub fn classify(prefab_name: &str) -> Option<ContainerCategory> {
    if BARREL_PREFAB_NAMES.contains(&prefab_name) {
        Some(ContainerCategory::Barrel)
    } else if ROAD_SIGN_PREFAB_NAMES.contains(&prefab_name) {
        Some(ContainerCategory::RoadSign)
    } else {
        None
    }
}

// --- Loot Tables ---

/// (item name, min quantity, max quantity, chance to appear)
type LootEntry = (&'static str, u32, u32, f32);

const BARREL_LOOT: &[LootEntry] = &[
    (SCRAP_ITEM_NAME, 2, 4, 1.0),
    ("cloth", 5, 20, 0.4),
    ("metal_fragments", 10, 35, 0.35),
    ("rope", 1, 2, 0.15),
    ("low_grade_fuel", 3, 8, 0.2),
];

const ROAD_SIGN_LOOT: &[LootEntry] = &[
    ("metal_fragments", 25, 50, 1.0),
    ("sheet_metal", 1, 1, 0.3),
    ("road_signs", 1, 2, 0.5),
];

fn loot_table(category: ContainerCategory) -> &'static [LootEntry] {
    match category {
        ContainerCategory::Barrel => BARREL_LOOT,
        ContainerCategory::RoadSign => ROAD_SIGN_LOOT,
    }
}

/// Rolls the contents of a freshly spawned container.
pub(crate) fn roll_loot<R: Rng>(rng: &mut R, category: ContainerCategory) -> Vec<(&'static str, u32)> {
    let mut loot = Vec::new();
    for (name, min, max, chance) in loot_table(category) {
        if rng.gen::<f32>() < *chance {
            loot.push((*name, rng.gen_range(*min..=*max)));
        }
    }
    loot
}

fn max_health_for(category: ContainerCategory) -> f32 {
    match category {
        ContainerCategory::Barrel => BARREL_MAX_HEALTH,
        ContainerCategory::RoadSign => ROAD_SIGN_MAX_HEALTH,
    }
}

/// Inserts a container and fills it with rolled loot.
pub(crate) fn spawn_container<R: Rng>(
    ctx: &ReducerContext,
    rng: &mut R,
    prefab_name: &str,
    pos_x: f32,
    pos_y: f32,
    pos_z: f32,
) -> Result<u64, String> {
    let category = classify(prefab_name)
        .ok_or_else(|| format!("'{}' is not a loot container prefab.", prefab_name))?;
    let max_health = max_health_for(category);

    let container = ctx.db.loot_container().try_insert(LootContainer {
        id: 0,
        prefab_name: prefab_name.to_string(),
        pos_x,
        pos_y,
        pos_z,
        health: max_health,
        max_health,
        last_attacker: None,
        last_hit_time: None,
        despawn_pending: false,
        is_destroyed: false,
        destroyed_with_gibs: false,
    }).map_err(|e| format!("Failed to insert loot container: {}", e))?;

    for (slot_index, (item_name, quantity)) in roll_loot(rng, category).into_iter().enumerate() {
        add_item_to_container(ctx, container.id, slot_index as u8, item_name, quantity)?;
    }
    log::debug!("[LootContainer] Spawned {} {} at ({:.1}, {:.1}).", prefab_name, container.id, pos_x, pos_y);
    Ok(container.id)
}

/// Seeds barrels and road signs if the world has none. Called from module init.
pub fn seed_loot_containers(ctx: &ReducerContext) -> Result<(), String> {
    if ctx.db.loot_container().iter().count() > 0 {
        log::debug!("[LootContainer] World already has loot containers, skipping seeding.");
        return Ok(());
    }
    let mut rng = StdRng::from_rng(ctx.rng()).map_err(|e| format!("Failed to seed RNG: {}", e))?;

    let mut spawned = 0;
    for _ in 0..SEED_BARREL_COUNT {
        let prefab = BARREL_PREFAB_NAMES[rng.gen_range(0..BARREL_PREFAB_NAMES.len())];
        let (x, y) = (rng.gen_range(0.0..WORLD_WIDTH_PX), rng.gen_range(0.0..WORLD_HEIGHT_PX));
        spawn_container(ctx, &mut rng, prefab, x, y, 0.0)?;
        spawned += 1;
    }
    for _ in 0..SEED_ROAD_SIGN_COUNT {
        let prefab = ROAD_SIGN_PREFAB_NAMES[rng.gen_range(0..ROAD_SIGN_PREFAB_NAMES.len())];
        let (x, y) = (rng.gen_range(0.0..WORLD_WIDTH_PX), rng.gen_range(0.0..WORLD_HEIGHT_PX));
        spawn_container(ctx, &mut rng, prefab, x, y, 0.0)?;
        spawned += 1;
    }
    log::info!("[LootContainer] Seeded {} loot containers.", spawned);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrels_classify_as_barrel() {
        for name in BARREL_PREFAB_NAMES {
            assert_eq!(classify(name), Some(ContainerCategory::Barrel), "{name}");
        }
    }

    #[test]
    fn road_signs_classify_as_road_sign() {
        for name in ROAD_SIGN_PREFAB_NAMES {
            assert_eq!(classify(name), Some(ContainerCategory::RoadSign), "{name}");
        }
    }

    #[test]
    fn other_prefabs_are_unrecognized() {
        for name in ["", "crate_normal", "roadsign10", "Loot_Barrel_1", "oil_barrel ", "wooden_storage_box"] {
            assert_eq!(classify(name), None, "{name:?}");
        }
    }

    #[test]
    fn barrels_always_roll_scrap() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let loot = roll_loot(&mut rng, ContainerCategory::Barrel);
            let scrap = loot.iter().find(|(name, _)| *name == SCRAP_ITEM_NAME);
            assert!(matches!(scrap, Some((_, qty)) if (2..=4).contains(qty)));
        }
    }
}
