//! Decision vector layout
//!
//! States are stored interleaved per time step, followed by the actuation
//! pairs:
//!
//! ```text
//! [ s_0 (6) | s_1 (6) | ... | s_{N-1} (6) | u_0 (2) | ... | u_{N-2} (2) ]
//! ```

/// Component of a vehicle state block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    X = 0,
    Y = 1,
    Psi = 2,
    V = 3,
    Cte = 4,
    Epsi = 5,
}

impl StateField {
    pub const ALL: [StateField; 6] = [
        StateField::X,
        StateField::Y,
        StateField::Psi,
        StateField::V,
        StateField::Cte,
        StateField::Epsi,
    ];
}

/// Component of an actuation block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationField {
    Steer = 0,
    Accel = 1,
}

/// Index arithmetic for a horizon of `steps` time steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    steps: usize,
}

impl Layout {
    pub const STATE_DIM: usize = 6;
    pub const ACTUATION_DIM: usize = 2;

    pub fn new(steps: usize) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of actuation blocks, one per transition
    pub fn transitions(&self) -> usize {
        self.steps.saturating_sub(1)
    }

    pub fn num_variables(&self) -> usize {
        Self::STATE_DIM * self.steps + Self::ACTUATION_DIM * self.transitions()
    }

    /// Initial pin plus one dynamics block per transition
    pub fn num_constraints(&self) -> usize {
        Self::STATE_DIM * self.steps
    }

    pub fn state_offset(&self, t: usize, field: StateField) -> usize {
        Self::STATE_DIM * t + field as usize
    }

    pub fn actuation_offset(&self, t: usize, field: ActuationField) -> usize {
        Self::STATE_DIM * self.steps + Self::ACTUATION_DIM * t + field as usize
    }

    /// Indices of every variable of state block `t`
    pub fn state_indices(&self, t: usize) -> impl Iterator<Item = usize> + '_ {
        StateField::ALL.iter().map(move |&f| self.state_offset(t, f))
    }

    /// Indices of actuation block `t`
    pub fn actuation_indices(&self, t: usize) -> [usize; 2] {
        [
            self.actuation_offset(t, ActuationField::Steer),
            self.actuation_offset(t, ActuationField::Accel),
        ]
    }

    pub fn state<S: Copy>(&self, x: &[S], t: usize) -> [S; 6] {
        let o = self.state_offset(t, StateField::X);
        [x[o], x[o + 1], x[o + 2], x[o + 3], x[o + 4], x[o + 5]]
    }

    /// `(steer, accel)` of actuation block `t`
    pub fn actuation<S: Copy>(&self, x: &[S], t: usize) -> (S, S) {
        let o = self.actuation_offset(t, ActuationField::Steer);
        (x[o], x[o + 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_scale_with_horizon() {
        for n in 2..=25 {
            let l = Layout::new(n);
            let next = Layout::new(n + 1);
            assert_eq!(l.num_variables(), 8 * n - 2);
            assert_eq!(next.num_variables() - l.num_variables(), 8);
            assert_eq!(next.num_constraints() - l.num_constraints(), 6);
        }
    }

    #[test]
    fn test_offsets_are_disjoint_and_dense() {
        let l = Layout::new(4);
        let mut seen = vec![false; l.num_variables()];
        for t in 0..4 {
            for i in l.state_indices(t) {
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
        for t in 0..3 {
            for i in l.actuation_indices(t).iter() {
                assert!(!seen[*i]);
                seen[*i] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_accessors() {
        let l = Layout::new(3);
        let x: Vec<f64> = (0..l.num_variables()).map(|i| i as f64).collect();
        assert_eq!(l.state(&x, 1), [6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(l.actuation(&x, 1), (20.0, 21.0));
        assert_eq!(l.state_offset(2, StateField::Epsi), 17);
        assert_eq!(l.actuation_offset(0, ActuationField::Accel), 19);
    }
}
