use std::fmt;

use crate::model::Member;

fn counted_votes(members: &[Member]) -> impl Iterator<Item = u32> + '_ {
    members
        .iter()
        .filter(|member| member.active)
        .filter_map(|member| member.vote.value())
}

/// Mean vote of active members that actually voted; `None` when nobody did.
pub fn average(members: &[Member]) -> Option<f64> {
    let (sum, count) = counted_votes(members).fold((0u64, 0u32), |(sum, count), vote| {
        (sum + u64::from(vote), count + 1)
    });
    (count > 0).then(|| sum as f64 / f64::from(count))
}

/// The shared vote when at least two active members voted and all agree.
pub fn consensus(members: &[Member]) -> Option<u32> {
    let mut votes = counted_votes(members);
    let first = votes.next()?;
    let mut count = 1;
    for vote in votes {
        if vote != first {
            return None;
        }
        count += 1;
    }
    (count >= 2).then_some(first)
}

/// Renders an average for display, `n/a` when undefined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AverageDisplay(pub Option<f64>);

impl fmt::Display for AverageDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("n/a"),
            Some(value) if value.fract() == 0.0 => write!(f, "{value:.0}"),
            Some(value) => {
                let rendered = format!("{value:.2}");
                f.write_str(rendered.trim_end_matches('0').trim_end_matches('.'))
            }
        }
    }
}
