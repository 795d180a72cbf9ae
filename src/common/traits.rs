//! Common traits defining interfaces for the controller components

/// Trait for vehicle motion models
pub trait MotionModel {
    /// State type
    type State: Copy;
    /// Control type
    type Control;

    /// Propagate state forward in time
    fn propagate(&self, state: &Self::State, control: &Self::Control, dt: f64) -> Self::State;

    /// Apply a control sequence from `initial`, returning every visited state
    /// including the initial one.
    fn rollout(&self, initial: &Self::State, controls: &[Self::Control], dt: f64) -> Vec<Self::State> {
        let mut states = Vec::with_capacity(controls.len() + 1);
        states.push(*initial);
        let mut current = *initial;
        for control in controls {
            current = self.propagate(&current, control, dt);
            states.push(current);
        }
        states
    }
}

/// Trait for controllers run once per control cycle
pub trait Controller {
    /// State type
    type State;
    /// Reference/target type
    type Reference;
    /// Output control type
    type Output;

    /// Compute control output
    fn compute(&mut self, state: &Self::State, reference: &Self::Reference) -> Self::Output;

    /// Reset controller state
    fn reset(&mut self);
}
