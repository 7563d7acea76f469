use super::{Strategy, StrategySnapshot};

/// Composite that only signals when every member agrees
///
/// Mixed signals cancel out; there is no majority vote.
pub struct UnanimousStrategy {
    members: Vec<Box<dyn Strategy>>,
}

impl UnanimousStrategy {
    pub fn new(members: Vec<Box<dyn Strategy>>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Box<dyn Strategy>] {
        &self.members
    }
}

impl Strategy for UnanimousStrategy {
    fn update(&mut self, price: f64) {
        for member in &mut self.members {
            member.update(price);
        }
    }

    fn long(&self) -> bool {
        !self.members.is_empty()
            && self.members.iter().all(|m| m.long())
            && !self.members.iter().any(|m| m.short())
    }

    fn short(&self) -> bool {
        !self.members.is_empty()
            && self.members.iter().all(|m| m.short())
            && !self.members.iter().any(|m| m.long())
    }

    fn name(&self) -> &str {
        "unanimous"
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot::Unanimous {
            members: self.members.iter().map(|m| m.snapshot()).collect(),
        }
    }
}
