use std::{path::PathBuf, process};

use ndarray::IxDyn;
use rand::{distributions::Uniform, Rng};
use structopt::StructOpt;
use tracing_subscriber::*;

use agglayer::{
    settings::Settings,
    AggLayer,
    ArgumentError,
    DeviceObject,
    ForwardData,
    ForwardOutput,
    LocalRuntime,
    NumericArray,
    PartyMap,
    Tensor,
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "AggLayer")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// Number of samples in a batch
    #[structopt(long, default_value = "4")]
    batch_size: usize,

    /// Width of the hidden representation of each party
    #[structopt(long, default_value = "8")]
    width: usize,

    /// Number of rounds to simulate
    #[structopt(long, default_value = "1")]
    rounds: usize,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let runtime = LocalRuntime::new();
    let mut layer = AggLayer::from_settings(&settings, runtime.clone()).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        layer: layer_settings,
        log: log_settings,
        ..
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if layer_settings.method.is_none() {
        // every bottom network emits a single tensor
        let output_num = layer.parties().iter().map(|party| (party.clone(), 1)).collect();
        if let Err(err) = layer.set_basenet_output_num(output_num) {
            error!("{}", err);
            process::exit(1);
        }
    }

    for _ in 0..opt.rounds {
        if let Err(err) = run_round(&layer, &opt, layer_settings.axis).await {
            error!("round failed: {:#}", err);
            process::exit(1);
        }
        let bytes: usize = runtime
            .transfers()
            .await
            .iter()
            .map(|transfer| transfer.bytes)
            .sum();
        info!(bytes, "transferred between devices");
        runtime.clear_transfers().await;
    }
}

/// Runs one round with random activations and the gradient of a sum of squares loss.
async fn run_round(
    layer: &AggLayer<LocalRuntime>,
    opt: &Opt,
    axis: usize,
) -> Result<(), anyhow::Error> {
    let mut rng = rand::thread_rng();
    let between = Uniform::new(-1_f32, 1.);
    let data: PartyMap<_> = layer
        .parties()
        .iter()
        .map(|party| {
            let hidden = NumericArray::from_shape_fn(IxDyn(&[opt.batch_size, opt.width]), |_| {
                rng.sample(between)
            });
            let data = ForwardData::new(Tensor::Dense(hidden), None);
            (party.clone(), DeviceObject::new(party.clone(), data))
        })
        .collect();

    let (output, context) = layer.forward(data, axis, None).await?;
    let (device, hiddens) = match output {
        ForwardOutput::Fused(fused) => {
            let (device, data) = fused.into_parts();
            let (hidden, _) = data.into_parts();
            (device, hidden.into_tensors())
        }
        ForwardOutput::Passthrough(hiddens) => hiddens.into_parts(),
    };
    info!(round = context.round(), tensors = hiddens.len(), "forward pass done");

    let gradient = hiddens
        .into_iter()
        .map(|hidden| {
            hidden
                .into_array()
                .map(|hidden| Tensor::Dense(hidden * 2.))
        })
        .collect::<Result<Vec<_>, ArgumentError>>()?;
    let gradients = layer
        .backward(DeviceObject::new(device, gradient), context, None)
        .await?;
    for party in layer.parties() {
        if let Some(gradient) = gradients.get(party) {
            info!(%party, tensors = gradient.value().len(), "received gradient");
        }
    }

    Ok(())
}
