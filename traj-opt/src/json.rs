//! Rollout emission as frontend-consumable JSON.

use serde_json::{Map, Value};

use traj_types::{euler::matrix_to_euler_xyz, scoped, Simulator};

use crate::rollout::RolloutView;

/// Serialize a rollout's body-node trajectories as a JSON object.
///
/// One key per `worldName.bodyName`; each value holds six arrays of length
/// `T` — `pos_x, pos_y, pos_z` (world-frame translation) and
/// `rot_x, rot_y, rot_z` (XYZ Euler angles) — produced by replaying the
/// identity-mapping positions through the simulator's forward kinematics.
/// The world state is restored afterwards.
pub fn rollout_to_json<S: Simulator>(rollout: &dyn RolloutView, world: &mut S) -> String {
    scoped(world, |w| {
        let steps = rollout.steps();
        let poses = rollout.poses("identity").clone_owned();
        let bodies = w.num_bodies();

        let mut tracks: Vec<[Vec<f64>; 6]> = (0..bodies)
            .map(|_| std::array::from_fn(|_| Vec::with_capacity(steps)))
            .collect();
        for t in 0..steps {
            w.set_positions(&poses.column(t).clone_owned());
            for (body, track) in tracks.iter_mut().enumerate() {
                let transform = w.body_world_transform(body);
                let translation = transform.translation.vector;
                let euler = matrix_to_euler_xyz(&transform.rotation.to_rotation_matrix());
                track[0].push(translation.x);
                track[1].push(translation.y);
                track[2].push(translation.z);
                track[3].push(euler.x);
                track[4].push(euler.y);
                track[5].push(euler.z);
            }
        }

        let mut root = Map::new();
        for (body, track) in tracks.into_iter().enumerate() {
            let name = format!("{}.{}", w.world_name(), w.body_name(body));
            let mut node = Map::new();
            let [pos_x, pos_y, pos_z, rot_x, rot_y, rot_z] = track;
            node.insert("pos_x".to_owned(), Value::from(pos_x));
            node.insert("pos_y".to_owned(), Value::from(pos_y));
            node.insert("pos_z".to_owned(), Value::from(pos_z));
            node.insert("rot_x".to_owned(), Value::from(rot_x));
            node.insert("rot_y".to_owned(), Value::from(rot_y));
            node.insert("rot_z".to_owned(), Value::from(rot_z));
            root.insert(name, Value::Object(node));
        }
        Value::Object(root).to_string()
    })
}
