//! The numerical side of training behind a narrow interface: run one step, save the state,
//! restore the state.

use std::collections::HashMap;

use log::{debug, warn};
use machine_learning::{
    optimization::{Adam, AdamState, Optimizer},
    params::ParamStore,
    schedule::ExponentialDecay,
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    TrainErr,
    config::TrainConfig,
    data::{Batch, RecordDims},
    error::Result,
    losses::LossAggregator,
    models::{EmotionNet, ModelDims, get_model},
    tensors::{NamedTensor, TensorFile},
};

const ADAM_M: &str = "optimizer/adam_m";
const ADAM_V: &str = "optimizer/adam_v";
const BETA1_POWER: &str = "beta1_power";
const BETA2_POWER: &str = "beta2_power";
pub const GLOBAL_STEP: &str = "global_step";

/// What a single optimization step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub total_loss: f32,
    pub scalars: Vec<(String, f32)>,
}

/// The outcome of restoring variables with the ignore missing policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
}

/// A trainable computation.
pub trait Engine: Send + 'static {
    /// Runs forward, backward and one parameter update on `batch`.
    ///
    /// # Arguments
    /// * `batch` - The data for this step.
    /// * `global_step` - The amount of steps completed before this one.
    fn step(&mut self, batch: &Batch, global_step: u64) -> Result<StepReport>;

    /// Captures every variable and the optimizer state.
    fn save_state(&self, global_step: u64) -> TensorFile;

    /// Restores a state captured by `save_state`, returning its global step.
    fn restore_state(&mut self, state: &TensorFile) -> Result<u64>;

    /// Assigns every model variable found in `file` with a matching shape, leaving the rest
    /// untouched. Never fails.
    fn restore_variables(&mut self, file: &TensorFile) -> RestoreReport;
}

/// The emotion recognition network trained with Adam on the concordance correlation loss.
pub struct EmotionEngine {
    net: EmotionNet,
    store: ParamStore,
    optimizer: Adam,
    schedule: ExponentialDecay,
    losses: LossAggregator,
    weight_decay: f32,
}

impl EmotionEngine {
    /// Builds and initializes the network selected in `cfg`.
    ///
    /// # Arguments
    /// * `cfg` - The training configuration.
    /// * `dims` - The dimensions of the records it will be trained on.
    /// * `samples_per_epoch` - The amount of records in the training split.
    pub fn build(cfg: &TrainConfig, dims: RecordDims, samples_per_epoch: usize) -> Result<Self> {
        let mut net = get_model(cfg.model)(&ModelDims::new(dims, cfg.hidden_units));
        let mut store = ParamStore::new();
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        net.init_params(&mut store, &mut rng)?;

        let schedule = ExponentialDecay::from_epochs(
            cfg.initial_learning_rate,
            samples_per_epoch,
            cfg.batch_size,
            cfg.num_epochs_per_decay,
            cfg.learning_rate_decay_factor,
        );

        debug!(
            "built {} model with {} parameters in {} variables, decaying every {} steps",
            cfg.model,
            store.len(),
            store.variables().len(),
            schedule.decay_steps()
        );

        Ok(Self::new(net, store, schedule, cfg.weight_decay))
    }

    /// Creates an engine around an initialized network.
    pub fn new(
        net: EmotionNet,
        store: ParamStore,
        schedule: ExponentialDecay,
        weight_decay: f32,
    ) -> Self {
        let optimizer = Adam::with_defaults(store.len(), schedule.learning_rate(0));

        Self {
            net,
            store,
            optimizer,
            schedule,
            losses: LossAggregator::new(),
            weight_decay,
        }
    }

    pub fn params(&self) -> &ParamStore {
        &self.store
    }
}

impl Engine for EmotionEngine {
    fn step(&mut self, batch: &Batch, global_step: u64) -> Result<StepReport> {
        let learning_rate = self.schedule.learning_rate(global_step);
        self.optimizer.set_learning_rate(learning_rate);
        self.store.zero_grad();

        let prediction = self.net.forward(self.store.params(), batch)?;
        let regularization = self.weight_decay * self.net.weight_penalty(self.store.params());
        let report = self.losses.compute(
            prediction.view(),
            batch.ground_truth.view(),
            regularization,
        )?;

        if !report.total.is_finite() {
            return Err(TrainErr::NonFiniteLoss {
                step: global_step,
                loss: report.total,
            });
        }

        let (params, grad) = self.store.params_and_grad_mut();
        self.net.backward(params, grad, report.d_prediction.view())?;
        self.net
            .add_weight_penalty_grad(params, grad, self.weight_decay);

        let grad_norm = self.store.grad_norm();
        let (grad, params) = self.store.grad_and_params_mut();
        self.optimizer.update_params(grad, params)?;

        let mut scalars = report.scalars();
        scalars.extend(
            self.store
                .variable_grad_norms()
                .map(|(name, norm)| (format!("gradients/{name}"), norm)),
        );
        scalars.push(("gradients/global_norm".to_string(), grad_norm));
        scalars.push(("learning_rate".to_string(), learning_rate));

        Ok(StepReport {
            total_loss: report.total,
            scalars,
        })
    }

    fn save_state(&self, global_step: u64) -> TensorFile {
        let mut tensors: Vec<NamedTensor> = self
            .store
            .variables()
            .iter()
            .map(|var| {
                NamedTensor::new(
                    var.name(),
                    var.shape().to_vec(),
                    self.store.params()[var.range()].to_vec(),
                )
            })
            .collect();

        let AdamState {
            m,
            v,
            beta1_power,
            beta2_power,
        } = self.optimizer.state();
        tensors.push(NamedTensor::new(ADAM_M, vec![m.len()], m));
        tensors.push(NamedTensor::new(ADAM_V, vec![v.len()], v));

        let metadata = HashMap::from([
            (GLOBAL_STEP.to_string(), global_step.to_string()),
            (BETA1_POWER.to_string(), beta1_power.to_string()),
            (BETA2_POWER.to_string(), beta2_power.to_string()),
        ]);

        TensorFile { tensors, metadata }
    }

    fn restore_state(&mut self, state: &TensorFile) -> Result<u64> {
        let invalid = TrainErr::InvalidState;
        let meta = |key: &str| {
            state
                .metadata
                .get(key)
                .ok_or_else(|| invalid(format!("missing metadata {key}")))
        };
        let global_step = meta(GLOBAL_STEP)?
            .parse::<u64>()
            .map_err(|e| invalid(format!("bad {GLOBAL_STEP}: {e}")))?;
        let beta1_power = meta(BETA1_POWER)?
            .parse::<f32>()
            .map_err(|e| invalid(format!("bad {BETA1_POWER}: {e}")))?;
        let beta2_power = meta(BETA2_POWER)?
            .parse::<f32>()
            .map_err(|e| invalid(format!("bad {BETA2_POWER}: {e}")))?;

        let slot = |name: &str| {
            state
                .get(name)
                .map(|t| t.values.clone())
                .ok_or_else(|| invalid(format!("missing tensor {name}")))
        };
        let (m, v) = (slot(ADAM_M)?, slot(ADAM_V)?);

        let names: Vec<String> = self
            .store
            .variables()
            .iter()
            .map(|var| var.name().to_string())
            .collect();
        for name in &names {
            let tensor = state
                .get(name)
                .ok_or_else(|| invalid(format!("missing variable {name}")))?;
            self.store.assign(name, &tensor.shape, &tensor.values)?;
        }

        self.optimizer.load_state(AdamState {
            m,
            v,
            beta1_power,
            beta2_power,
        })?;

        Ok(global_step)
    }

    fn restore_variables(&mut self, file: &TensorFile) -> RestoreReport {
        let mut report = RestoreReport::default();
        let names: Vec<String> = self
            .store
            .variables()
            .iter()
            .map(|var| var.name().to_string())
            .collect();

        for name in names {
            let Some(tensor) = file.get(&name) else {
                report.missing.push(name);
                continue;
            };

            match self.store.assign(&name, &tensor.shape, &tensor.values) {
                Ok(()) => report.restored.push(name),
                Err(e) => {
                    warn!("not restoring {name}: {e}");
                    report.mismatched.push(name);
                }
            }
        }

        report
    }
}
