//! Epoch loop: forward, loss, backward, clip, Adam step, checkpoint.
//!
//! ```ignore
//! let summaries = Trainer::new(model, loss_for(cfg.use_mse), TrainerConfig::from_run_config(&cfg))
//!     .with_checkpoints(CheckpointStore::new(&run_dir))
//!     .fit(&loader)?;
//! ```

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::{CLIP_NORM, CLIP_VALUE, EPOCHS, LOG_INTERVAL};
use crate::core::model::DischargeModel;
use crate::data::batch::Batch;
use crate::data::provider::DataProvider;
use crate::error::{HydroError, Result};
use crate::runtime::checkpoint::CheckpointStore;
use crate::runtime::run_config::RunConfig;
use crate::training::clip::{clip_grad_norm, global_norm};
use crate::training::loss::LossFunction;
use crate::training::optimizer::Adam;
use crate::training::phases::{PhaseCollector, PhaseTimings, TimingCollector};
use crate::training::scheduler::{Scheduler, StepSchedule};

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    /// Last epoch to train (epochs are numbered from 1).
    pub epochs: usize,
    pub clip_norm: bool,
    pub clip_value: f32,
    /// Batches between progress lines.
    pub log_interval: usize,
    pub schedule: StepSchedule,
    /// Seed of the dropout RNG.
    pub seed: u64,
    /// Also checkpoint the optimizer state every epoch.
    pub save_optimizer: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: EPOCHS,
            clip_norm: CLIP_NORM,
            clip_value: CLIP_VALUE,
            log_interval: LOG_INTERVAL,
            schedule: StepSchedule::default(),
            seed: 0,
            save_optimizer: true,
        }
    }
}

impl TrainerConfig {
    pub fn from_run_config(cfg: &RunConfig) -> Self {
        Self {
            epochs: cfg.epochs,
            clip_norm: cfg.clip_norm,
            clip_value: cfg.clip_value,
            log_interval: cfg.log_interval,
            schedule: cfg.schedule(),
            seed: cfg.seed,
            save_optimizer: true,
        }
    }
}

/// Outcome of one optimization step.
#[derive(Clone, Copy, Debug)]
pub struct StepReport {
    pub loss: f32,
    /// Global gradient norm before clipping.
    pub grad_norm: f32,
    pub clipped: bool,
}

/// Outcome of one epoch.
#[derive(Clone, Debug)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_loss: f32,
    pub learning_rate: f32,
    pub batches: usize,
    /// Phase timings, when the collector records them.
    pub timings: Option<PhaseTimings>,
    pub checkpoint: Option<PathBuf>,
}

pub struct Trainer<C = TimingCollector> {
    model: DischargeModel,
    optimizer: Adam,
    loss: Box<dyn LossFunction>,
    config: TrainerConfig,
    collector: C,
    checkpoints: Option<CheckpointStore>,
    rng: StdRng,
    start_epoch: usize,
    epoch: usize,
    batch: usize,
}

impl Trainer<TimingCollector> {
    pub fn new(model: DischargeModel, loss: Box<dyn LossFunction>, config: TrainerConfig) -> Self {
        let lr = config.schedule.lr(1);
        Self {
            model,
            optimizer: Adam::new(lr),
            loss,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            collector: TimingCollector::new(),
            checkpoints: None,
            start_epoch: 1,
            epoch: 0,
            batch: 0,
        }
    }
}

impl<C: PhaseCollector> Trainer<C> {
    /// Replace the phase collector.
    pub fn with_collector<D: PhaseCollector>(self, collector: D) -> Trainer<D> {
        Trainer {
            model: self.model,
            optimizer: self.optimizer,
            loss: self.loss,
            config: self.config,
            collector,
            checkpoints: self.checkpoints,
            rng: self.rng,
            start_epoch: self.start_epoch,
            epoch: self.epoch,
            batch: self.batch,
        }
    }

    /// Persist a checkpoint at the end of every epoch.
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Continue from the checkpoint of `epoch`; training resumes at `epoch + 1`.
    pub fn resume_from(mut self, epoch: usize) -> Result<Self> {
        let store = self.checkpoints.as_ref().ok_or_else(|| {
            HydroError::Config("resuming needs a checkpoint store".into())
        })?;
        let model = store.load_model(epoch)?;
        if model.spec() != self.model.spec() {
            return Err(HydroError::Config(format!(
                "checkpoint of epoch {} was trained with a different model shape",
                epoch
            )));
        }
        match store.load_optimizer(epoch)? {
            Some(optimizer) => self.optimizer = optimizer,
            None => debug!(epoch, "no optimizer state saved, starting with fresh moments"),
        }
        self.model = model;
        self.start_epoch = epoch + 1;
        info!(epoch, "resuming training");
        Ok(self)
    }

    pub fn model(&self) -> &DischargeModel {
        &self.model
    }

    pub fn into_model(self) -> DischargeModel {
        self.model
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }

    pub fn collector(&self) -> &C {
        &self.collector
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    /// Train from the start epoch through `config.epochs`.
    pub fn fit(&mut self, provider: &dyn DataProvider) -> Result<Vec<EpochSummary>> {
        info!(
            params = self.model.param_count(),
            variant = ?self.model.variant(),
            loss = self.loss.name(),
            batches = provider.num_batches(),
            seq_len = provider.seq_length(),
            "starting training"
        );
        let mut summaries = Vec::new();
        for epoch in self.start_epoch..=self.config.epochs {
            summaries.push(self.train_epoch(provider, epoch)?);
        }
        Ok(summaries)
    }

    pub fn train_epoch(&mut self, provider: &dyn DataProvider, epoch: usize) -> Result<EpochSummary> {
        let lr = self.config.schedule.lr(epoch);
        self.optimizer.set_lr(lr);
        self.epoch = epoch;
        self.collector.epoch_start(epoch);

        let mut total_loss = 0.0f64;
        let mut batches = 0usize;
        for (i, batch) in provider.epoch_batches(epoch).enumerate() {
            let batch = batch?;
            self.batch = i;
            let report = self.train_step(&batch)?;
            total_loss += report.loss as f64;
            batches += 1;

            if self.config.log_interval > 0 && batches % self.config.log_interval == 0 {
                debug!(
                    epoch,
                    batch = batches,
                    loss = report.loss,
                    grad_norm = report.grad_norm,
                    clipped = report.clipped,
                    "training progress"
                );
            }
        }
        self.collector.epoch_done(epoch);

        if batches == 0 {
            return Err(HydroError::Config(format!("epoch {} produced no batches", epoch)));
        }

        let checkpoint = match &self.checkpoints {
            Some(store) => {
                let path = store.save_model(epoch, &self.model)?;
                if self.config.save_optimizer {
                    store.save_optimizer(epoch, &self.optimizer)?;
                }
                Some(path)
            }
            None => None,
        };

        let summary = EpochSummary {
            epoch,
            mean_loss: (total_loss / batches as f64) as f32,
            learning_rate: lr,
            batches,
            timings: self.collector.epoch_timings(),
            checkpoint,
        };
        match &summary.timings {
            Some(t) => info!(epoch, loss = summary.mean_loss, lr, "epoch done: {}", t.breakdown()),
            None => info!(epoch, loss = summary.mean_loss, lr, "epoch done"),
        }
        Ok(summary)
    }

    /// One optimization step on `batch`.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepReport> {
        self.collector.batch_start(self.batch);

        let (pred, cache) = self.model.forward_train(
            batch.x_dyn.view(),
            batch.x_static.as_ref().map(|s| s.view()),
            &mut self.rng,
        )?;
        self.collector.forward_done();

        let (loss, d_pred) = self.loss.loss_and_grad(
            pred.view(),
            batch.targets.view(),
            batch.q_std.as_ref().map(|q| q.view()),
        )?;
        if !loss.is_finite() {
            return Err(HydroError::NonFiniteLoss {
                epoch: self.epoch,
                batch: self.batch,
                loss,
            });
        }

        let mut grads = self.model.backward(&cache, &d_pred)?;
        self.collector.backward_done();

        let (grad_norm, clipped) = if self.config.clip_norm {
            let norm = clip_grad_norm(grads.views_mut(), self.config.clip_value);
            (norm, norm > self.config.clip_value)
        } else {
            (global_norm(&grads.views()), false)
        };

        self.optimizer.step(self.model.params_mut(), &grads.views())?;
        self.collector.step_done();

        Ok(StepReport {
            loss,
            grad_norm,
            clipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ModelSpec, ModelVariant};
    use crate::data::batch::Sample;
    use crate::data::provider::{BatchLoader, LoaderConfig};
    use crate::training::loss::{MseLoss, NseLoss};
    use crate::training::phases::NoopCollector;
    use ndarray::{Array1, Array2};

    fn spec() -> ModelSpec {
        ModelSpec {
            variant: ModelVariant::EaLstm,
            dynamic_size: 1,
            static_size: 2,
            hidden_size: 8,
            dropout: 0.0,
            initial_forget_bias: 5.0,
        }
    }

    /// Target is a linear function of the last input value.
    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let x: Vec<f32> = (0..5).map(|t| ((i * 5 + t) as f32 * 0.3).sin()).collect();
                Sample {
                    target: 0.8 * x[4],
                    x_dyn: Array2::from_shape_vec((5, 1), x).unwrap(),
                    x_static: Array1::from_vec(vec![0.5, -0.5]),
                    q_std: Some(1.0),
                }
            })
            .collect()
    }

    fn loader(n: usize) -> BatchLoader {
        BatchLoader::new(
            samples(n),
            LoaderConfig {
                batch_size: 8,
                num_workers: 0,
                seed: 3,
                ..LoaderConfig::default()
            },
        )
        .unwrap()
    }

    fn config(epochs: usize) -> TrainerConfig {
        TrainerConfig {
            epochs,
            schedule: StepSchedule::constant(0.01),
            seed: 1,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn test_loss_decreases() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut trainer = Trainer::new(model, Box::new(MseLoss), config(15));
        let summaries = trainer.fit(&loader(64)).unwrap();

        assert_eq!(summaries.len(), 15);
        assert_eq!(summaries[0].epoch, 1);
        assert_eq!(summaries[0].batches, 8);
        let first = summaries.first().unwrap().mean_loss;
        let last = summaries.last().unwrap().mean_loss;
        assert!(last < first * 0.5, "loss {} -> {}", first, last);
        assert!(summaries[0].timings.is_some());
    }

    #[test]
    fn test_schedule_applied_per_epoch() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut cfg = config(3);
        cfg.schedule = StepSchedule::new(0.01, [(2, 0.005), (3, 0.001)]);
        let mut trainer = Trainer::new(model, Box::new(MseLoss), cfg).with_collector(NoopCollector);
        let summaries = trainer.fit(&loader(16)).unwrap();
        let lrs: Vec<f32> = summaries.iter().map(|s| s.learning_rate).collect();
        assert_eq!(lrs, vec![0.01, 0.005, 0.001]);
        assert!(summaries[0].timings.is_none());
    }

    #[test]
    fn test_clipping_reported() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut cfg = config(1);
        cfg.clip_value = 1e-6;
        let mut trainer = Trainer::new(model, Box::new(MseLoss), cfg);
        let batch = Batch::from_samples(&samples(4)).unwrap();
        let report = trainer.train_step(&batch).unwrap();
        assert!(report.clipped);
        assert!(report.grad_norm > 1e-6);
    }

    #[test]
    fn test_non_finite_loss_aborts() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut trainer = Trainer::new(model, Box::new(MseLoss), config(1));
        let mut bad = samples(4);
        bad[2].target = f32::NAN;
        let batch = Batch::from_samples(&bad).unwrap();
        assert!(matches!(
            trainer.train_step(&batch),
            Err(HydroError::NonFiniteLoss { .. })
        ));
    }

    #[test]
    fn test_nse_loss_without_std_aborts() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut trainer = Trainer::new(model, Box::new(NseLoss::default()), config(1));
        let mut plain = samples(4);
        for s in plain.iter_mut() {
            s.q_std = None;
        }
        let batch = Batch::from_samples(&plain).unwrap();
        assert!(matches!(trainer.train_step(&batch), Err(HydroError::MissingTargetStd)));
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl PhaseCollector for Recorder {
        fn epoch_start(&mut self, epoch: usize) {
            self.events.push(format!("epoch_start {}", epoch));
        }
        fn batch_start(&mut self, batch: usize) {
            self.events.push(format!("batch_start {}", batch));
        }
        fn forward_done(&mut self) {
            self.events.push("forward".into());
        }
        fn backward_done(&mut self) {
            self.events.push("backward".into());
        }
        fn step_done(&mut self) {
            self.events.push("step".into());
        }
        fn epoch_done(&mut self, epoch: usize) {
            self.events.push(format!("epoch_done {}", epoch));
        }
    }

    #[test]
    fn test_phase_boundaries_in_order() {
        let model = DischargeModel::new(spec(), 0).unwrap();
        let mut trainer =
            Trainer::new(model, Box::new(MseLoss), config(1)).with_collector(Recorder::default());
        trainer.fit(&loader(16)).unwrap();
        assert_eq!(
            trainer.collector().events,
            vec![
                "epoch_start 1",
                "batch_start 0",
                "forward",
                "backward",
                "step",
                "batch_start 1",
                "forward",
                "backward",
                "step",
                "epoch_done 1",
            ]
        );
    }

    #[test]
    fn test_checkpoint_every_epoch_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let data = loader(32);

        let mut straight = Trainer::new(DischargeModel::new(spec(), 0).unwrap(), Box::new(MseLoss), config(2))
            .with_checkpoints(store.clone());
        let summaries = straight.fit(&data).unwrap();
        assert_eq!(store.epochs().unwrap(), vec![1, 2]);
        assert_eq!(summaries[1].checkpoint, Some(store.model_path(2)));

        let mut resumed = Trainer::new(DischargeModel::new(spec(), 0).unwrap(), Box::new(MseLoss), config(2))
            .with_checkpoints(store.clone())
            .resume_from(1)
            .unwrap();
        assert_eq!(resumed.start_epoch(), 2);
        let tail = resumed.fit(&data).unwrap();

        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].epoch, 2);
        assert_eq!(
            resumed.model().to_bytes().unwrap(),
            straight.model().to_bytes().unwrap()
        );
    }

    #[test]
    fn test_resume_without_store_is_error() {
        let trainer = Trainer::new(DischargeModel::new(spec(), 0).unwrap(), Box::new(MseLoss), config(2));
        assert!(trainer.resume_from(1).is_err());
    }
}
