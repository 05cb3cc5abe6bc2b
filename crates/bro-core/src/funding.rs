//! Funding planner: turns an arbitrary UTXO set into N equal-value outputs.
//!
//! The planner never builds or signs a transaction. It only decides which
//! UTXOs to spend, how many outputs to create and how the leftover value is
//! split between change and fee.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::error::ConfigError;
use crate::fees::FeeEstimator;
use crate::utxo::{total_value, Utxo};

/// How a plan reaches the requested output count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingStrategy {
    /// Enough outputs of the right value already exist; no transaction.
    Sufficient,
    /// Split one or more large UTXOs.
    SplitLarge,
    /// Merge small UTXOs into the missing outputs.
    CombineSmall,
    /// Spend every usable UTXO into the requested outputs.
    CombineAll,
    /// Funds cover only some of the requested outputs.
    PartialFunding,
    /// Not even one output is affordable.
    Insufficient,
}

/// Breakdown of one split UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitDetail {
    pub utxo: Utxo,
    /// Outputs carved out of this UTXO.
    pub outputs: u64,
    pub outputs_value: u64,
    /// Change returned for this UTXO; 0 when it was dust.
    pub change: u64,
    /// Fee share plus any folded dust.
    pub fee: u64,
}

/// Result of [`FundingPlanner::plan`].
///
/// For every strategy except `Insufficient`:
/// `sum(input_utxos) == output_count * output_value + total_change + total_fee`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingPlan {
    pub strategy: FundingStrategy,
    /// UTXOs to spend, in order. For `Sufficient` these are used as-is.
    pub input_utxos: Vec<Utxo>,
    /// Outputs of `output_value` the plan yields from `input_utxos`.
    pub output_count: u64,
    pub output_value: u64,
    pub total_fee: u64,
    pub total_change: u64,
    pub requested_outputs: u64,
    /// Valid UTXOs left untouched that still count toward the request.
    pub existing_utxos: Vec<Utxo>,
    pub split_details: Vec<SplitDetail>,
    /// UTXOs skipped because their value marks an asset.
    pub protected_count: usize,
    /// Value still missing to fund every requested output.
    pub shortfall: u64,
    /// Outputs the usable funds can pay for; equals the request when fully funded.
    pub max_affordable_outputs: u64,
}

impl FundingPlan {
    fn empty(strategy: FundingStrategy, requested_outputs: u64, output_value: u64) -> Self {
        FundingPlan {
            strategy,
            input_utxos: Vec::new(),
            output_count: 0,
            output_value,
            total_fee: 0,
            total_change: 0,
            requested_outputs,
            existing_utxos: Vec::new(),
            split_details: Vec::new(),
            protected_count: 0,
            shortfall: 0,
            max_affordable_outputs: requested_outputs,
        }
    }

    /// Whether a funding transaction has to be signed and broadcast.
    pub fn needs_transaction(&self) -> bool {
        !matches!(
            self.strategy,
            FundingStrategy::Sufficient | FundingStrategy::Insufficient
        )
    }

    /// Whether the plan funds fewer outputs than requested.
    pub fn is_partial(&self) -> bool {
        self.strategy != FundingStrategy::Insufficient && self.spendable_count() < self.requested_outputs
    }

    /// Outputs of the right value available once the plan is carried out.
    pub fn spendable_count(&self) -> u64 {
        self.existing_utxos.len() as u64 + self.output_count
    }

    pub fn input_value(&self) -> u64 {
        total_value(&self.input_utxos)
    }

    /// Check the balance equation.
    pub fn is_balanced(&self) -> bool {
        let outputs = self.output_count.checked_mul(self.output_value);
        let spent = outputs
            .and_then(|o| o.checked_add(self.total_change))
            .and_then(|o| o.checked_add(self.total_fee));
        spent == Some(self.input_value())
    }
}

/// Plans funding transactions with fees from an injected estimator.
#[derive(Debug, Clone)]
pub struct FundingPlanner<E> {
    config: PlannerConfig,
    estimator: E,
}

impl<E: FeeEstimator> FundingPlanner<E> {
    /// Planner with the default configuration.
    pub fn new(estimator: E) -> Self {
        FundingPlanner {
            config: PlannerConfig::default(),
            estimator,
        }
    }

    pub fn with_config(config: PlannerConfig, estimator: E) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(FundingPlanner { config, estimator })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan how to obtain `required_outputs` outputs of the configured value.
    ///
    /// Never fails: when nothing is affordable the plan is `Insufficient`
    /// and carries the shortfall.
    pub fn plan(&self, utxos: &[Utxo], required_outputs: u64) -> FundingPlan {
        let value = self.config.output_value;
        let (usable, protected): (Vec<&Utxo>, Vec<&Utxo>) =
            utxos.iter().partition(|u| !self.config.is_protected(u.value));
        let valid: Vec<&Utxo> = usable.iter().copied().filter(|u| u.value >= value).collect();

        debug!(
            "planning {} outputs from {} utxos ({} protected, {} valid)",
            required_outputs,
            utxos.len(),
            protected.len(),
            valid.len()
        );

        let mut plan = self.plan_usable(&usable, &valid, required_outputs);
        plan.protected_count = protected.len();
        info!(
            "funding plan {:?}: {} inputs, {} outputs, fee {}, change {}",
            plan.strategy,
            plan.input_utxos.len(),
            plan.output_count,
            plan.total_fee,
            plan.total_change
        );
        plan
    }

    fn plan_usable(&self, usable: &[&Utxo], valid: &[&Utxo], required: u64) -> FundingPlan {
        let value = self.config.output_value;

        if valid.len() as u64 >= required {
            let selected = &valid[..required as usize];
            return self.sufficient(selected, required);
        }

        let total = usable.iter().fold(0u64, |sum, u| sum.saturating_add(u.value));
        let fee_estimate = self.estimate_fee(usable.len(), required);
        let needed = value.saturating_mul(required).saturating_add(fee_estimate);

        if total < needed {
            let shortfall = needed - total;
            // A partial plan never funds every requested output
            let affordable = (total.saturating_sub(self.config.affordability_reserve) / value)
                .min(required.saturating_sub(1));
            if affordable == 0 {
                warn!("insufficient funds: {} available, {} needed", total, needed);
                let mut plan = FundingPlan::empty(FundingStrategy::Insufficient, required, value);
                plan.shortfall = shortfall;
                plan.max_affordable_outputs = 0;
                return plan;
            }

            let mut plan = if valid.len() as u64 >= affordable {
                self.sufficient(&valid[..affordable as usize], required)
            } else {
                self.sweep(FundingStrategy::PartialFunding, usable, affordable, required)
            };
            plan.shortfall = shortfall;
            plan.max_affordable_outputs = affordable;
            return plan;
        }

        let missing = required - valid.len() as u64;

        let mut large: Vec<&Utxo> = usable
            .iter()
            .copied()
            .filter(|u| u.value >= value.saturating_mul(2))
            .collect();
        large.sort_by(|a, b| b.value.cmp(&a.value));
        if let Some(plan) = self.split_large(&large, valid, missing, required) {
            return plan;
        }

        let mut small: Vec<&Utxo> = usable
            .iter()
            .copied()
            .filter(|u| u.value < value && u.value >= self.config.dust_limit)
            .collect();
        small.sort_by(|a, b| b.value.cmp(&a.value));
        if small.len() >= 2 {
            if let Some(plan) = self.combine_small(&small, valid, missing, required) {
                return plan;
            }
        }

        self.sweep(FundingStrategy::CombineAll, usable, required, required)
    }

    fn estimate_fee(&self, usable: usize, required: u64) -> u64 {
        let inputs = usable.min(self.config.max_estimated_inputs);
        let outputs = usize::try_from(required).unwrap_or(usize::MAX).saturating_add(1);
        match self.estimator.estimate_fee(inputs, outputs) {
            Ok(fee) => fee,
            Err(e) => {
                let fallback = self
                    .config
                    .fallback_fee_base
                    .saturating_add(self.config.fallback_fee_per_output.saturating_mul(required));
                warn!("fee estimate failed, using {} sat: {}", fallback, e);
                fallback
            }
        }
    }

    fn sufficient(&self, selected: &[&Utxo], required: u64) -> FundingPlan {
        let value = self.config.output_value;
        let inputs: Vec<Utxo> = selected.iter().map(|u| (*u).clone()).collect();
        let count = inputs.len() as u64;
        let mut plan = FundingPlan::empty(FundingStrategy::Sufficient, required, value);
        // Value above the output amount stays on the UTXOs themselves
        plan.total_change = total_value(&inputs) - count * value;
        plan.output_count = count;
        plan.input_utxos = inputs;
        plan
    }

    /// Split large UTXOs, largest first. Each split UTXO was itself valid, so
    /// spending it frees one slot that its own outputs must refill.
    fn split_large(&self, large: &[&Utxo], valid: &[&Utxo], missing: u64, required: u64) -> Option<FundingPlan> {
        let value = self.config.output_value;
        let fee_share = self.config.split_fee_per_input;
        let mut remaining = missing;
        let mut details = Vec::new();

        for utxo in large {
            if remaining == 0 {
                break;
            }
            let wanted = remaining + 1;
            let available = utxo.value.saturating_sub(fee_share);
            let outputs = (available / value).min(wanted);
            if outputs < 2 {
                continue;
            }
            remaining = wanted - outputs;

            let outputs_value = outputs * value;
            let (fee, change) = settle(utxo.value, outputs_value, fee_share, self.config.dust_limit);
            details.push(SplitDetail {
                utxo: (*utxo).clone(),
                outputs,
                outputs_value,
                change,
                fee,
            });
        }

        if remaining > 0 {
            debug!("splitting leaves {} outputs uncovered", remaining);
            return None;
        }

        let existing: Vec<Utxo> = valid
            .iter()
            .filter(|u| !details.iter().any(|d| d.utxo == ***u))
            .map(|u| (*u).clone())
            .collect();

        let mut plan = FundingPlan::empty(FundingStrategy::SplitLarge, required, value);
        plan.input_utxos = details.iter().map(|d| d.utxo.clone()).collect();
        plan.output_count = details.iter().map(|d| d.outputs).sum();
        plan.total_fee = details.iter().map(|d| d.fee).sum();
        plan.total_change = details.iter().map(|d| d.change).sum();
        plan.existing_utxos = existing;
        plan.split_details = details;
        Some(plan)
    }

    /// Merge small UTXOs, largest first, until they cover the missing outputs
    /// and the fee of spending them.
    fn combine_small(&self, small: &[&Utxo], valid: &[&Utxo], missing: u64, required: u64) -> Option<FundingPlan> {
        let value = self.config.output_value;
        let outputs_value = missing * value;
        let mut inputs = Vec::new();
        let mut combined = 0u64;
        let mut fee = self.config.combine_base_fee;

        for utxo in small {
            inputs.push((*utxo).clone());
            combined += utxo.value;
            fee = self.config.combine_base_fee + self.config.combine_fee_per_input * inputs.len() as u64;
            if combined >= outputs_value + fee {
                break;
            }
        }
        if combined < outputs_value + fee {
            return None;
        }

        let (total_fee, total_change) = settle(combined, outputs_value, fee, self.config.dust_limit);
        let mut plan = FundingPlan::empty(FundingStrategy::CombineSmall, required, value);
        plan.input_utxos = inputs;
        plan.output_count = missing;
        plan.total_fee = total_fee;
        plan.total_change = total_change;
        plan.existing_utxos = valid.iter().map(|u| (*u).clone()).collect();
        Some(plan)
    }

    /// Spend every usable UTXO into `outputs` outputs.
    fn sweep(&self, strategy: FundingStrategy, usable: &[&Utxo], outputs: u64, required: u64) -> FundingPlan {
        let value = self.config.output_value;
        let mut inputs: Vec<Utxo> = usable.iter().map(|u| (*u).clone()).collect();
        inputs.sort_by(|a, b| b.value.cmp(&a.value));

        let fee = self.config.sweep_base_fee
            + self.config.sweep_fee_per_input * inputs.len() as u64
            + self.config.sweep_fee_per_output * outputs;
        let (total_fee, total_change) = settle(total_value(&inputs), outputs * value, fee, self.config.dust_limit);

        let mut plan = FundingPlan::empty(strategy, required, value);
        plan.input_utxos = inputs;
        plan.output_count = outputs;
        plan.total_fee = total_fee;
        plan.total_change = total_change;
        plan
    }
}

/// Split what is left after the outputs into fee and change. Change at or
/// below the dust limit, or not covering the fee, is absorbed into the fee.
fn settle(inputs: u64, outputs: u64, fee: u64, dust_limit: u64) -> (u64, u64) {
    let spare = inputs.saturating_sub(outputs);
    match spare.checked_sub(fee) {
        Some(change) if change > dust_limit => (fee, change),
        _ => (spare, 0),
    }
}
