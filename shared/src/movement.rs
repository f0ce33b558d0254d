//! Player transform and the movement integration shared by the server
//! simulation and client-side prediction. Both must produce identical
//! results for the same inputs.

use crate::protocol::InputSnapshot;
use crate::tuning::Tuning;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Input components smaller than this are treated as zero for look.
const LOOK_DEADZONE: f32 = 0.01;

/// Position, body yaw and head pitch of a player.
///
/// Forward is `rotation * +Z`. Pitch is in degrees, positive looks down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Quat,
    pub pitch: f32,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            pitch: 0.0,
        }
    }
}

impl TransformState {
    /// Placed at `position`, yawed to face `center` on the horizontal plane.
    pub fn facing(position: Vec3, center: Vec3) -> Self {
        let mut to_center = center - position;
        to_center.y = 0.0;
        let rotation = if to_center.length_squared() > 0.001 {
            Quat::from_rotation_y(to_center.x.atan2(to_center.z))
        } else {
            Quat::IDENTITY
        };
        Self {
            position,
            rotation,
            pitch: 0.0,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// Body yaw combined with head pitch.
    pub fn aim_direction(&self) -> Vec3 {
        let head = self.rotation * Quat::from_rotation_x(self.pitch.to_radians());
        (head * Vec3::Z).normalize_or_zero()
    }

    pub fn muzzle(&self, tuning: &Tuning) -> Vec3 {
        self.position + Vec3::Y * tuning.eye_height + self.aim_direction() * tuning.muzzle_offset
    }

    /// Angle between the two body orientations in degrees.
    pub fn angle_to(&self, other: &TransformState) -> f32 {
        self.rotation.angle_between(other.rotation).to_degrees()
    }

    pub fn distance_to(&self, other: &TransformState) -> f32 {
        self.position.distance(other.position)
    }

    /// Moves a fraction `t` of the way toward `target`.
    pub fn lerp_toward(&self, target: &TransformState, t: f32) -> TransformState {
        let t = t.clamp(0.0, 1.0);
        TransformState {
            position: self.position.lerp(target.position, t),
            rotation: self.rotation.slerp(target.rotation, t).normalize(),
            pitch: self.pitch + (target.pitch - self.pitch) * t,
        }
    }
}

/// Applies one tick of input to a transform.
///
/// Displacement is in the body's local frame and scaled by `dt`. Yaw rotates
/// the body, pitch only the head and is clamped.
pub fn apply_movement(
    transform: &mut TransformState,
    input: &InputSnapshot,
    dt: f32,
    tuning: &Tuning,
) {
    let local = Vec3::new(input.move_vector.x, input.vertical_move, input.move_vector.y);
    let world = transform.rotation * local;
    transform.position += world * tuning.move_speed * dt;
    confine(&mut transform.position, tuning);

    if input.look_delta.x.abs() > LOOK_DEADZONE {
        let yaw = (input.look_delta.x * tuning.rotation_speed * dt).to_radians();
        transform.rotation = (Quat::from_rotation_y(yaw) * transform.rotation).normalize();
    }

    if input.look_delta.y.abs() > LOOK_DEADZONE {
        transform.pitch -= input.look_delta.y * tuning.vertical_look_speed * dt;
        transform.pitch = transform.pitch.clamp(-tuning.pitch_limit, tuning.pitch_limit);
    }
}

fn confine(position: &mut Vec3, tuning: &Tuning) {
    position.y = position.y.clamp(tuning.floor_height, tuning.ceiling_height);

    let offset = Vec3::new(
        position.x - tuning.arena_center.x,
        0.0,
        position.z - tuning.arena_center.z,
    );
    let distance = offset.length();
    if distance > tuning.arena_radius {
        let clamped = offset * (tuning.arena_radius / distance);
        position.x = tuning.arena_center.x + clamped.x;
        position.z = tuning.arena_center.z + clamped.z;
    }
}
