//! Reward function and composer bound together for one environment

use tracing::{debug, instrument};

use crate::composer::{
    ComposedGradient, ComposedQ, Composer, PowerParams, compose_batch, compose_with_gradient,
};
use crate::error::{CmorlError, Result};
use crate::objective::{ObjectiveVector, Transition};
use crate::reward::RewardFunction;

/// Pairs a reward function with the composer that consumes its output
///
/// Every objective vector leaving [`Cmorl::reward`] has the composer's width
/// and lies in the engine's domain.
pub struct Cmorl<R, C> {
    reward_fn: R,
    composer: C,
}

impl<R, C> Cmorl<R, C>
where
    R: RewardFunction,
    C: Composer,
{
    /// Bind a reward function to a composer of the same width
    pub fn new(reward_fn: R, composer: C) -> Result<Self> {
        let produced = reward_fn.components().len();
        if produced != composer.num_objectives() {
            return Err(CmorlError::DimensionMismatch {
                expected: composer.num_objectives(),
                actual: produced,
            });
        }
        debug!(
            composer = composer.name(),
            objectives = produced,
            order = %composer.reduction_order(),
            "cmorl unit created"
        );
        Ok(Self {
            reward_fn,
            composer,
        })
    }

    pub fn num_objectives(&self) -> usize {
        self.composer.num_objectives()
    }

    pub fn reward_fn(&self) -> &R {
        &self.reward_fn
    }

    pub fn composer(&self) -> &C {
        &self.composer
    }

    /// Objective vector for one transition
    pub fn reward(&self, transition: &Transition, env: &mut R::Env) -> Result<ObjectiveVector> {
        let objectives = self.reward_fn.objectives(transition, env)?;
        objectives.check_width(self.composer.num_objectives())?;
        objectives.check_domain()?;
        Ok(objectives)
    }

    /// Compose a batch of objective vectors (critic predictions or rewards)
    #[instrument(level = "trace", skip(self, batch), fields(batch = batch.len()))]
    pub fn q_composer<B: AsRef<[f64]>>(
        &self,
        batch: &[B],
        powers: PowerParams,
    ) -> Result<ComposedQ> {
        compose_batch(&self.composer, batch, powers)
    }

    /// Compose a batch and return the gradient of the scalar for every input
    pub fn q_composer_with_gradient<B: AsRef<[f64]>>(
        &self,
        batch: &[B],
        powers: PowerParams,
    ) -> Result<ComposedGradient> {
        compose_with_gradient(&self.composer, batch, powers)
    }
}

impl<R, C> std::fmt::Debug for Cmorl<R, C>
where
    C: Composer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmorl")
            .field("composer", &self.composer.name())
            .field("num_objectives", &self.composer.num_objectives())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::{PMeanComposer, ReductionOrder};
    use crate::reward::{FnReward, ObjectiveDef};

    fn unit(
        width: usize,
    ) -> Cmorl<
        FnReward<impl Fn(&Transition, &mut f64) -> Result<ObjectiveVector> + Send + Sync, f64>,
        PMeanComposer,
    > {
        let reward = FnReward::new(
            ObjectiveDef::numbered("obj", 2),
            |t: &Transition, scale: &mut f64| {
                Ok(t.action.iter().map(|a| a * *scale).collect())
            },
        );
        Cmorl::new(
            reward,
            PMeanComposer::new(width, ReductionOrder::ObjectivesThenBatch),
        )
        .unwrap()
    }

    #[test]
    fn test_width_checked_at_construction() {
        let reward = FnReward::new(
            ObjectiveDef::numbered("obj", 3),
            |_: &Transition, _: &mut ()| Ok(ObjectiveVector::new(vec![0.0; 3])),
        );
        let err = Cmorl::new(
            reward,
            PMeanComposer::new(2, ReductionOrder::ObjectivesThenBatch),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CmorlError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_reward_validates_output() {
        let cmorl = unit(2);
        let mut scale = 0.5;

        let ok = Transition::new(vec![], vec![1.0, 0.5], vec![], false);
        assert_eq!(cmorl.reward(&ok, &mut scale).unwrap().as_slice(), &[0.5, 0.25]);

        let negative = Transition::new(vec![], vec![1.0, -0.5], vec![], false);
        assert!(matches!(
            cmorl.reward(&negative, &mut scale),
            Err(CmorlError::DomainViolation { index: 1, .. })
        ));

        let wide = Transition::new(vec![], vec![0.1, 0.2, 0.3], vec![], false);
        assert!(matches!(
            cmorl.reward(&wide, &mut scale),
            Err(CmorlError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_q_composer_matches_free_function() {
        let cmorl = unit(2);
        let batch = vec![vec![0.2, 0.8], vec![0.6, 0.4]];
        let powers = PowerParams::new(1.0, -1.0);

        let via_unit = cmorl.q_composer(&batch, powers).unwrap();
        let direct = compose_batch(cmorl.composer(), &batch, powers).unwrap();
        assert_eq!(via_unit, direct);

        let with_grad = cmorl.q_composer_with_gradient(&batch, powers).unwrap();
        assert_eq!(with_grad.composed, via_unit);
        assert!(with_grad.gradient.iter().flatten().all(|g| *g > 0.0));
    }

    #[test]
    fn test_empty_batch() {
        let cmorl = unit(2);
        let empty: Vec<ObjectiveVector> = Vec::new();
        let out = cmorl.q_composer(&empty, PowerParams::default()).unwrap();
        assert_eq!(out.per_objective, vec![0.0, 0.0]);
        assert_eq!(out.scalar, 0.0);
    }
}
