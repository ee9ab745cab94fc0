use serde::{Deserialize, Serialize};

/// Per-model running loss and example counts over one accumulation window, that is, a training
/// phase or a validation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LossAccumulator {
    running_losses: Vec<f64>,
    examples: Vec<usize>,
}

impl LossAccumulator {
    /// Creates a new accumulator for `n` models, with every count at zero.
    pub fn new(n: usize) -> Self {
        Self {
            running_losses: vec![0.0; n],
            examples: vec![0; n],
        }
    }

    /// Adds the loss of a batch of `batch_size` examples seen by model `i`.
    ///
    /// # Panics
    /// If `i` is out of bounds.
    pub fn accumulate(&mut self, i: usize, loss: f64, batch_size: usize) {
        self.running_losses[i] += loss * batch_size as f64;
        self.examples[i] += batch_size;
    }

    /// Returns the average loss of every model, `+inf` for models that saw no examples.
    pub fn average_losses(&self) -> Vec<f64> {
        average_losses(&self.running_losses, &self.examples)
    }

    /// Returns the average loss over every example seen by any model.
    pub fn pooled_average(&self) -> f64 {
        average(self.running_losses.iter().sum(), self.total_examples())
    }

    pub fn examples(&self) -> &[usize] {
        &self.examples
    }

    pub fn total_examples(&self) -> usize {
        self.examples.iter().sum()
    }
}

fn average(total: f64, examples: usize) -> f64 {
    if examples > 0 {
        total / examples as f64
    } else {
        f64::INFINITY
    }
}

/// Divides each summed loss by its example count, yielding `+inf` where the count is zero.
pub fn average_losses(total_losses: &[f64], total_examples: &[usize]) -> Vec<f64> {
    total_losses
        .iter()
        .zip(total_examples)
        .map(|(&total, &examples)| average(total, examples))
        .collect()
}

/// Returns the throughput of a phase, zero if no time was measured.
pub fn examples_per_second(total_examples: usize, duration_sec: f64) -> f64 {
    if duration_sec > 0.0 {
        total_examples as f64 / duration_sec
    } else {
        0.0
    }
}

/// The summary of a single epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub epoch_duration_sec: f64,
    pub examples_per_sec: f64,
    /// Whether the pooled validation loss improved on every previous epoch.
    pub improved: bool,
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub train_examples: Vec<usize>,
}

impl EpochMetrics {
    /// Formats the console summary line of this epoch.
    pub fn to_log_line(&self) -> String {
        format!(
            "Epoch {};  loss {};  val loss: {};  {:.2} sec/epoch; {:.2} examples/sec{}",
            self.epoch,
            format_g(self.train_loss),
            format_g(self.val_loss),
            self.epoch_duration_sec,
            self.examples_per_sec,
            if self.improved { " **" } else { "" },
        )
    }
}

/// The metrics of every epoch of a run, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingLog {
    epochs: Vec<EpochMetrics>,
}

impl TrainingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Formats `value` like C's `%g`: six significant digits, scientific notation for very small or
/// large magnitudes and no trailing zeros.
pub fn format_g(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.into();
    }
    if value == 0.0 {
        return "0".into();
    }

    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_zeros(mantissa), exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        trim_zeros(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
