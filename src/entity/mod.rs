use std::fmt::{Display, Formatter};

use crate::coords::{AbsVelocity, AbsXyz, BlockXyz, LookDegrees};
use crate::inventory::ItemStack;

pub(crate) mod allocator;

const GRAVITY: f64 = 0.04;
const DRAG: f64 = 0.98;
const GROUND_FRICTION: f64 = 0.6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct EntityId(pub(crate) i32);

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MobType(pub(crate) i8);

impl MobType {
    /**
     * Resolves the persisted name of a mob to its type id.
     */
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let id = match name {
            "Creeper" => 50,
            "Skeleton" => 51,
            "Spider" => 52,
            "Giant" => 53,
            "Zombie" => 54,
            "Slime" => 55,
            "Ghast" => 56,
            "PigZombie" => 57,
            "Pig" => 90,
            "Sheep" => 91,
            "Cow" => 92,
            "Chicken" => 93,
            "Squid" => 94,
            "Wolf" => 95,
            _ => return None,
        };
        Some(Self(id))
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum EntityKind {
    Item(ItemStack),
    Mob(MobType),
}

/// Entity as stored on disk, before it has been given an id.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct EntityData {
    pub(crate) kind: EntityKind,
    pub(crate) position: AbsXyz,
    pub(crate) velocity: AbsVelocity,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Entity {
    pub(crate) id: EntityId,
    pub(crate) kind: EntityKind,
    pub(crate) position: AbsXyz,
    pub(crate) velocity: AbsVelocity,
    pub(crate) look: LookDegrees,
    pub(crate) on_ground: bool,
}

impl Entity {
    pub(crate) fn new(id: EntityId, data: EntityData) -> Self {
        Self {
            id,
            kind: data.kind,
            position: data.position,
            velocity: data.velocity,
            look: LookDegrees::default(),
            on_ground: false,
        }
    }

    pub(crate) fn item(&self) -> Option<ItemStack> {
        match self.kind {
            EntityKind::Item(stack) => Some(stack),
            EntityKind::Mob(_) => None,
        }
    }

    /**
     * Advances the entity by one tick: moves it by its velocity, then applies gravity and drag.
     * An entity falling into a solid block comes to rest on top of it.
     */
    pub(crate) fn step(&mut self, is_solid: impl Fn(BlockXyz) -> bool) {
        self.position.x += self.velocity.x;
        self.position.y += self.velocity.y;
        self.position.z += self.velocity.z;

        let resting_on = if self.velocity.y <= 0.0 {
            self.position.block().filter(|block| is_solid(*block))
        } else {
            None
        };

        match resting_on {
            Some(block) => {
                self.position.y = block.y as f64 + 1.0;
                self.velocity.y = 0.0;
                self.velocity.x *= GROUND_FRICTION;
                self.velocity.z *= GROUND_FRICTION;
                self.on_ground = true;
            }
            None => {
                self.velocity.y -= GRAVITY;
                self.on_ground = false;
            }
        }

        self.velocity.x *= DRAG;
        self.velocity.y *= DRAG;
        self.velocity.z *= DRAG;
    }
}
