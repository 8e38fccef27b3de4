use spacetimedb::{SpacetimeType, Identity};

/// Enum to differentiate the world containers that support auto pickup.
/// Also the namespace for the container's permissions (`Barrel.On`, ...).
#[derive(SpacetimeType, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContainerCategory {
    Barrel,
    RoadSign,
}

impl ContainerCategory {
    pub const ALL: [ContainerCategory; 2] = [ContainerCategory::Barrel, ContainerCategory::RoadSign];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerCategory::Barrel => "Barrel",
            ContainerCategory::RoadSign => "RoadSign",
        }
    }
}

/// How a container leaves the world.
#[derive(SpacetimeType, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DestroyMode {
    /// Broken apart with debris for clients to render.
    Gib,
    /// Removed without any debris effect.
    Clean,
}

/// Kinds of per-player modifiers that affect gathering.
#[derive(SpacetimeType, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModifierKind {
    ScrapYield,
}

// --- Data structs for ItemLocation variants ---

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct InventoryLocationData {
    pub owner_id: Identity,
}

#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub struct ContainerLocationData {
    pub container_id: u64,
    pub slot_index: u8,
}

/// Represents the specific location of an InventoryItem.
#[derive(SpacetimeType, Clone, Debug, PartialEq)]
pub enum ItemLocation {
    Inventory(InventoryLocationData),
    Container(ContainerLocationData),
    Unknown, // Represents an undefined or invalid location
}

impl ItemLocation {
    pub fn is_player_bound(&self) -> Option<Identity> {
        match self {
            ItemLocation::Inventory(data) => Some(data.owner_id),
            _ => None,
        }
    }

    pub fn is_container_bound(&self) -> Option<u64> {
        match self {
            ItemLocation::Container(data) => Some(data.container_id),
            _ => None,
        }
    }
}
