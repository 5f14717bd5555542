use crate::agent_state::AgentState;
use contagion_common::{clamp, SimParams, Vec2};

/// Advances every agent along its heading with perfectly elastic wall reflection.
///
/// Each axis is handled on its own: an agent leaving `[0, bound]` is clamped onto the
/// wall and its heading component on that axis is turned back inward.
pub fn advance(agents: &mut AgentState, params: &SimParams, delta: f32) {
    let step = params.agent_speed * delta;
    let num_agents = agents.len();

    for idx in 0..num_agents {
        let direction = agents.direction(idx);
        let moved = agents.position(idx) + direction * step;

        let (x, dir_x) = reflect_axis(moved.x, direction.x, params.world_width);
        let (y, dir_y) = reflect_axis(moved.y, direction.y, params.world_height);

        agents.set_position(idx, Vec2::new(x, y));
        agents.set_direction(idx, Vec2::new(dir_x, dir_y));
    }
}

#[inline(always)]
fn reflect_axis(pos: f32, dir: f32, bound: f32) -> (f32, f32) {
    if pos > bound {
        (bound, -dir.abs())
    } else if pos < 0.0 {
        (0.0, dir.abs())
    } else {
        (clamp(pos, 0.0, bound), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;

    fn single_agent(pos: Vec2, dir: Vec2) -> AgentState {
        AgentState::from_parts(&[pos], &[dir]).unwrap()
    }

    #[test]
    fn moves_along_heading() {
        let params = sample_config(1).get_sim_params();
        let mut agents = single_agent(Vec2::new(10.0, 10.0), Vec2::new(0.6, 0.8));
        advance(&mut agents, &params, 1.0);
        let pos = agents.position(0);
        assert!((pos.x - (10.0 + 0.6 * params.agent_speed)).abs() < 1e-5);
        assert!((pos.y - (10.0 + 0.8 * params.agent_speed)).abs() < 1e-5);
    }

    #[test]
    fn overshoot_flips_heading_and_clamps_to_wall() {
        let params = sample_config(1).get_sim_params();
        let start = Vec2::new(params.world_width + 0.01, 5.0);
        let mut agents = single_agent(start, Vec2::new(1.0, 0.0));
        advance(&mut agents, &params, params.dt);
        assert!(agents.direction(0).x < 0.0);
        assert_eq!(agents.position(0).x, params.world_width);
        assert_eq!(agents.position(0).y, 5.0);
    }

    #[test]
    fn axes_reflect_independently_at_corner() {
        let params = sample_config(1).get_sim_params();
        let mut agents = single_agent(Vec2::new(0.01, 0.01), Vec2::new(-0.6, -0.8));
        advance(&mut agents, &params, 1.0);
        assert_eq!(agents.position(0), Vec2::new(0.0, 0.0));
        let dir = agents.direction(0);
        assert!((dir.x - 0.6).abs() < 1e-6 && (dir.y - 0.8).abs() < 1e-6);
    }
}
