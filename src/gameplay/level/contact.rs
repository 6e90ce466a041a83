use bevy::prelude::*;
use bevy_rapier2d::prelude::*;

/// Semantic label attached to every collider the classifier cares about.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Land,
    Finish,
    Boundary,
    Chassis,
    Wheel,
}

impl BodyTag {
    pub fn is_vehicle(self) -> bool {
        matches!(self, Self::Chassis | Self::Wheel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactOutcome {
    FinishReached,
    GroundTouched { chassis: bool },
    Ignored,
}

#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleContactMessage {
    FinishReached,
    GroundTouched { chassis: bool },
}

/// Maps one collision-begin pair onto exactly one outcome. Finish wins over land.
pub fn classify_contact(a: Option<BodyTag>, b: Option<BodyTag>) -> ContactOutcome {
    let vehicle_with = |other: BodyTag| -> Option<BodyTag> {
        match (a, b) {
            (Some(x), Some(y)) if x == other && y.is_vehicle() => Some(y),
            (Some(x), Some(y)) if y == other && x.is_vehicle() => Some(x),
            _ => None,
        }
    };

    if vehicle_with(BodyTag::Finish).is_some() {
        return ContactOutcome::FinishReached;
    }

    match vehicle_with(BodyTag::Land) {
        Some(part) => ContactOutcome::GroundTouched {
            chassis: part == BodyTag::Chassis,
        },
        None => ContactOutcome::Ignored,
    }
}

pub(super) fn classify_collision_events(
    mut collision_events: MessageReader<CollisionEvent>,
    tags: Query<&BodyTag>,
    mut contacts: MessageWriter<VehicleContactMessage>,
) {
    for event in collision_events.read() {
        let CollisionEvent::Started(first, second, _) = event else {
            continue;
        };

        let outcome = classify_contact(tags.get(*first).ok().copied(), tags.get(*second).ok().copied());
        match outcome {
            ContactOutcome::FinishReached => {
                contacts.write(VehicleContactMessage::FinishReached);
            }
            ContactOutcome::GroundTouched { chassis } => {
                contacts.write(VehicleContactMessage::GroundTouched { chassis });
            }
            ContactOutcome::Ignored => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_with_any_vehicle_part_completes() {
        for part in [BodyTag::Chassis, BodyTag::Wheel] {
            assert_eq!(
                classify_contact(Some(BodyTag::Finish), Some(part)),
                ContactOutcome::FinishReached
            );
            assert_eq!(
                classify_contact(Some(part), Some(BodyTag::Finish)),
                ContactOutcome::FinishReached
            );
        }
    }

    #[test]
    fn land_contacts_report_which_part_touched() {
        assert_eq!(
            classify_contact(Some(BodyTag::Wheel), Some(BodyTag::Land)),
            ContactOutcome::GroundTouched { chassis: false }
        );
        assert_eq!(
            classify_contact(Some(BodyTag::Land), Some(BodyTag::Chassis)),
            ContactOutcome::GroundTouched { chassis: true }
        );
    }

    #[test]
    fn unrelated_pairs_are_ignored() {
        let cases = [
            (Some(BodyTag::Land), Some(BodyTag::Finish)),
            (Some(BodyTag::Boundary), Some(BodyTag::Chassis)),
            (Some(BodyTag::Wheel), Some(BodyTag::Chassis)),
            (None, Some(BodyTag::Wheel)),
            (None, None),
        ];

        for (a, b) in cases {
            assert_eq!(classify_contact(a, b), ContactOutcome::Ignored);
        }
    }
}
