//! Story data model.
//!
//! Planning artifacts (`StoryBrief`, `CharacterRoster`, `WorldContext`) are
//! produced once and never mutated. The `Outline` fixes the unit order; only
//! each unit's `prior_summary` is filled in as earlier units are accepted.
//! `Draft` and `Feedback` are the per-attempt products of the revision loop.

mod brief;
mod characters;
mod draft;
mod feedback;
mod outline;
mod world;

pub use brief::{Genre, ScopeParameters, StoryBrief, ToneProfile};
pub use characters::{CharacterProfile, CharacterRelationship, CharacterRole, CharacterRoster};
pub use draft::{Draft, render_manuscript};
pub use feedback::{EditItem, EditSeverity, EditType, Feedback};
pub use outline::{ActOutline, Outline, UnitId, UnitOutline};
pub use world::{Location, WorldContext, WorldRule};
