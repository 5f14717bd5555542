use super::{per_contact_probability, ContactInput, ContactTracer, DispatchError};
use contagion_common::Vec2;

/// Single-threaded exposure pass over the bucketed grid.
#[derive(Debug, Default)]
pub struct HostContactTracer {
    /// Infectious ids gathered around the current susceptible agent.
    scratch: Vec<u32>,
}

impl HostContactTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContactTracer for HostContactTracer {
    fn name(&self) -> &'static str {
        "host"
    }

    fn infect_contacts(&mut self, input: &ContactInput<'_>) -> Result<Vec<u32>, DispatchError> {
        let mut exposed = Vec::new();

        for &agent in &input.grid.susceptible {
            let idx = agent as usize;
            let pos = Vec2::new(input.positions_x[idx], input.positions_y[idx]);

            self.scratch.clear();
            let scratch = &mut self.scratch;
            input.grid.for_each_nearby_infectious(pos, |id| scratch.push(id));
            if self.scratch.is_empty() {
                continue;
            }

            let p_eff = per_contact_probability(input.base_probability, self.scratch.len());
            let draw = input.draws[idx];
            for &contact in &self.scratch {
                let contact_pos = Vec2::new(input.positions_x[contact as usize], input.positions_y[contact as usize]);
                if pos.distance_squared(contact_pos) <= input.radius_sq && draw < p_eff {
                    exposed.push(agent);
                    break; // First hit wins.
                }
            }
        }

        Ok(exposed)
    }
}
