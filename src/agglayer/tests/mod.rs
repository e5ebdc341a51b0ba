use std::sync::Arc;

use ndarray::{array, Array1, IxDyn};

use crate::{
    agglayer::{AggLayer, PartyMap},
    compress::{Compressor, QuantizedZeroPoint, TopkSparse},
    device::{Device, DeviceObject},
    envelope::{ForwardData, Losses},
    error::{AggLayerError, ArgumentError, ConfigError},
    method::{AggMethod, Concat, Sum, Weight, WeightInput},
    runtime::local::LocalRuntime,
    tensor::{Backend, Hidden, NativeTensor, NumericArray, SparseTensor, Tensor},
};

fn alice() -> Device {
    Device::plain("alice")
}

fn bob() -> Device {
    Device::plain("bob")
}

fn carol() -> Device {
    Device::plain("carol")
}

fn parties() -> Vec<Device> {
    vec![alice(), bob(), carol()]
}

fn filled(shape: &[usize], value: f32) -> Tensor {
    Tensor::Dense(NumericArray::from_elem(IxDyn(shape), value))
}

fn envelope(party: &Device, hidden: impl Into<Hidden>) -> (Device, DeviceObject<ForwardData>) {
    (
        party.clone(),
        DeviceObject::new(party.clone(), ForwardData::new(hidden, None)),
    )
}

/// Gets envelopes where the hidden of the i-th party is filled with `i + 1`.
fn envelopes(parties: &[Device], shape: &[usize]) -> PartyMap<DeviceObject<ForwardData>> {
    parties
        .iter()
        .enumerate()
        .map(|(i, party)| envelope(party, filled(shape, (i + 1) as f32)))
        .collect()
}

fn layer(
    aggregator: Device,
    method: Option<Arc<dyn AggMethod>>,
    compressor: Option<Arc<dyn Compressor>>,
) -> (LocalRuntime, AggLayer<LocalRuntime>) {
    let runtime = LocalRuntime::new();
    let layer = AggLayer::new(
        runtime.clone(),
        aggregator,
        parties(),
        alice(),
        method,
        Backend::Tensorflow,
        compressor,
    )
    .unwrap();
    (runtime, layer)
}

fn single(gradient: &DeviceObject<Hidden>) -> NumericArray {
    gradient
        .value()
        .clone()
        .into_single()
        .unwrap()
        .into_array()
        .unwrap()
}

#[test]
fn test_new_checks_aggregator_and_label_holder() {
    let devices = vec![
        alice(),
        bob(),
        Device::secure_compute("spu"),
        Device::homomorphic("heu"),
    ];
    for aggregator in &devices {
        for label_holder in &[alice(), bob()] {
            let res = AggLayer::new(
                LocalRuntime::new(),
                aggregator.clone(),
                vec![alice(), bob()],
                label_holder.clone(),
                None,
                Backend::Torch,
                None,
            );
            if aggregator == label_holder {
                assert!(res.is_ok());
            } else {
                assert!(matches!(
                    res,
                    Err(ConfigError::AggregatorMismatch { .. })
                ));
            }

            assert!(AggLayer::new(
                LocalRuntime::new(),
                aggregator.clone(),
                vec![alice(), bob()],
                label_holder.clone(),
                Some(Arc::new(Sum)),
                Backend::Torch,
                None,
            )
            .is_ok());
        }
    }
}

#[test]
fn test_new_checks_parties() {
    let new = |parties: Vec<Device>, label_holder: Device| {
        AggLayer::new(
            LocalRuntime::new(),
            alice(),
            parties,
            label_holder,
            Some(Arc::new(Sum)),
            Backend::Tensorflow,
            None,
        )
        .map(|_| ())
    };

    assert_eq!(new(vec![], alice()), Err(ConfigError::NoParties));
    assert_eq!(
        new(vec![alice(), bob(), alice()], alice()),
        Err(ConfigError::DuplicateParty(alice()))
    );
    assert_eq!(
        new(vec![alice(), Device::secure_compute("spu")], alice()),
        Err(ConfigError::PartyNotPlain(Device::secure_compute("spu")))
    );
    assert_eq!(
        new(vec![alice(), bob()], Device::homomorphic("heu")),
        Err(ConfigError::LabelHolderNotPlain(Device::homomorphic("heu")))
    );
}

#[test]
fn test_accessors() {
    let (_, layer) = layer(Device::secure_compute("spu"), Some(Arc::new(Sum)), None);
    assert_eq!(layer.parties(), parties().as_slice());
    assert_eq!(layer.aggregator(), &Device::secure_compute("spu"));
    assert_eq!(layer.label_holder(), &alice());
    assert_eq!(layer.backend(), Backend::Tensorflow);
    assert!(layer.basenet_output_num().is_none());
}

#[tokio::test]
async fn test_collect() {
    let (_, layer) = layer(Device::homomorphic("heu"), Some(Arc::new(Sum)), None);

    let collected = layer.collect(envelopes(&parties(), &[2])).await.unwrap();
    assert_eq!(collected.hiddens.len(), 3);
    for (i, hidden) in collected.hiddens.iter().enumerate() {
        assert!(hidden.is_on(&Device::homomorphic("heu")));
        assert_eq!(hidden.value(), &filled(&[2], (i + 1) as f32));
    }
    assert!(collected.losses.is_on(&alice()));
    assert_eq!(collected.losses.value(), &vec![None, None, None]);
}

#[tokio::test]
async fn test_fusion_round_trip() {
    let aggregators = vec![
        alice(),
        Device::secure_compute("spu"),
        Device::homomorphic("heu"),
    ];
    for aggregator in aggregators {
        let (_, layer) = layer(aggregator.clone(), Some(Arc::new(Sum)), None);

        let (output, context) = layer
            .forward(envelopes(&parties(), &[2, 3]), 0, None)
            .await
            .unwrap();
        let fused = output.into_fused().unwrap();
        assert!(fused.is_on(&alice()));
        let ForwardData { hidden, losses } = fused.into_inner();
        assert_eq!(
            hidden,
            Hidden::Single(Tensor::Native(NativeTensor {
                backend: Backend::Tensorflow,
                array: NumericArray::from_elem(IxDyn(&[2, 3]), 6.),
            }))
        );
        assert_eq!(losses, Some(Losses::PerParty(vec![None, None, None])));
        assert_eq!(context.hiddens().len(), 3);
        assert!(context
            .hiddens()
            .iter()
            .all(|hidden| hidden.is_on(&aggregator)));
        assert!(context.sparse().is_none());

        let gradient = DeviceObject::new(alice(), vec![filled(&[2, 3], 1.)]);
        let gradients = layer.backward(gradient, context, None).await.unwrap();
        assert_eq!(gradients.len(), 3);
        for party in parties() {
            let gradient = &gradients[&party];
            assert!(gradient.is_on(&party));
            assert!(matches!(
                gradient.value(),
                Hidden::Single(Tensor::Native(native)) if native.backend == Backend::Tensorflow
            ));
            assert_eq!(single(gradient), NumericArray::ones(IxDyn(&[2, 3])));
        }
    }
}

#[tokio::test]
async fn test_weighted_fusion() {
    let (_, layer) = layer(alice(), Some(Arc::new(Sum)), None);
    let weights = || {
        Some(vec![
            WeightInput::Local(Weight::Scalar(1.)),
            WeightInput::Remote(DeviceObject::new(bob(), Weight::Scalar(2.))),
            WeightInput::Local(Weight::Scalar(0.)),
        ])
    };

    let (output, context) = layer
        .forward(envelopes(&parties(), &[2]), 0, weights())
        .await
        .unwrap();
    let fused = output.into_fused().unwrap().into_inner();
    assert_eq!(
        fused.hidden.into_single().unwrap().into_array().unwrap(),
        array![5_f32, 5.].into_dyn()
    );

    let gradient = DeviceObject::new(alice(), vec![filled(&[2], 1.)]);
    let gradients = layer.backward(gradient, context, weights()).await.unwrap();
    assert_eq!(single(&gradients[&alice()]), array![1_f32, 1.].into_dyn());
    assert_eq!(single(&gradients[&bob()]), array![2_f32, 2.].into_dyn());
    assert_eq!(single(&gradients[&carol()]), array![0_f32, 0.].into_dyn());
}

#[tokio::test]
async fn test_sparse_mask_round_trip() {
    let (_, layer) = layer(alice(), Some(Arc::new(Sum)), Some(Arc::new(TopkSparse::new(0.5))));

    // the largest magnitudes of alice and bob sit on disjoint positions
    let data = vec![
        envelope(&alice(), Tensor::Dense(array![4_f32, 3., 0., 0.].into_dyn())),
        envelope(&bob(), Tensor::Dense(array![0_f32, 0., 2., 1.].into_dyn())),
        envelope(&carol(), filled(&[4], 0.)),
    ]
    .into_iter()
    .collect();
    let (output, context) = layer.forward(data, 0, None).await.unwrap();

    let fused = output.into_fused().unwrap().into_inner();
    assert_eq!(
        fused.hidden.into_single().unwrap().into_array().unwrap(),
        array![4_f32, 3., 2., 1.].into_dyn()
    );
    let sparse = context.sparse().unwrap();
    assert!(sparse.is_on(&alice()));
    assert_eq!(sparse.value().compressed(), &[false]);
    assert_eq!(sparse.value().masks().unwrap(), &[None]);

    // only the scatter hop sparsifies the gradients
    let gradient = DeviceObject::new(
        alice(),
        vec![Tensor::Dense(array![1_f32, 2., 3., 4.].into_dyn())],
    );
    let gradients = layer.backward(gradient, context, None).await.unwrap();
    for party in parties() {
        assert_eq!(
            single(&gradients[&party]),
            array![0_f32, 0., 3., 4.].into_dyn()
        );
    }
}

#[tokio::test]
async fn test_passthrough_sparse_round_trip() {
    let mut layer = AggLayer::new(
        LocalRuntime::new(),
        alice(),
        parties(),
        alice(),
        None,
        Backend::Torch,
        Some(Arc::new(TopkSparse::new(0.5))),
    )
    .unwrap();
    layer
        .set_basenet_output_num(
            vec![(alice(), 2), (bob(), 3), (carol(), 1)]
                .into_iter()
                .collect(),
        )
        .unwrap();
    let sparse = |indices: Vec<usize>, values: Vec<f32>| {
        Tensor::Sparse(SparseTensor::new(vec![4], indices, values).unwrap())
    };
    let dense = |values: [f32; 4]| Tensor::Dense(Array1::from(values.to_vec()).into_dyn());

    let data = vec![
        envelope(
            &alice(),
            vec![sparse(vec![0, 1], vec![1., 2.]), sparse(vec![3], vec![5.])],
        ),
        envelope(
            &bob(),
            vec![
                sparse(vec![2], vec![3.]),
                sparse(vec![0, 3], vec![1., 1.]),
                dense([1., 0., 2., 0.]),
            ],
        ),
        envelope(&carol(), sparse(vec![1, 2], vec![4., 4.])),
    ]
    .into_iter()
    .collect();
    let (output, context) = layer.forward(data, 0, None).await.unwrap();

    assert_eq!(
        output.into_passthrough().unwrap().into_inner(),
        vec![
            dense([1., 2., 0., 0.]),
            dense([0., 0., 0., 5.]),
            dense([0., 0., 3., 0.]),
            dense([1., 0., 0., 1.]),
            dense([1., 0., 2., 0.]),
            dense([0., 4., 4., 0.]),
        ]
    );
    let state = context.sparse().unwrap().value();
    assert_eq!(state.compressed(), &[true, true, true, true, false, true]);
    assert_eq!(state.masks().unwrap().len(), 6);
    assert!(state.masks().unwrap()[4].is_none());

    let gradient = DeviceObject::new(alice(), vec![filled(&[4], 1.); 6]);
    let gradients = layer.backward(gradient, context, None).await.unwrap();
    let expected = vec![
        (alice(), vec![[1_f32, 1., 0., 0.], [0., 0., 0., 1.]]),
        (bob(), vec![[0., 0., 1., 0.], [1., 0., 0., 1.], [1., 1., 1., 1.]]),
        (carol(), vec![[0., 1., 1., 0.]]),
    ];
    for (party, slices) in expected {
        let gradient = &gradients[&party];
        assert!(gradient.is_on(&party));
        let arrays = gradient
            .value()
            .clone()
            .into_tensors()
            .into_iter()
            .map(|tensor| tensor.into_array().unwrap())
            .collect::<Vec<_>>();
        let slices = slices
            .iter()
            .map(|slice| Array1::from(slice.to_vec()).into_dyn())
            .collect::<Vec<_>>();
        assert_eq!(arrays, slices);
    }
}

#[tokio::test]
async fn test_argument_checks_move_nothing() {
    let (runtime, layer) = layer(alice(), Some(Arc::new(Sum)), None);
    let mut data = envelopes(&parties(), &[2]);
    data.insert(
        bob(),
        DeviceObject::new(bob(), ForwardData::new(vec![filled(&[2], 1.); 2], None)),
    );
    assert!(matches!(
        layer.forward(data, 0, None).await,
        Err(AggLayerError::Argument(ArgumentError::MultiHiddenInFusion { count: 2, .. }))
    ));
    assert!(runtime.transfers().await.is_empty());

    let (_, context) = layer
        .forward(envelopes(&parties(), &[2]), 0, None)
        .await
        .unwrap();
    runtime.clear_transfers().await;
    assert!(matches!(
        layer
            .backward(DeviceObject::new(bob(), vec![]), context, None)
            .await,
        Err(AggLayerError::Argument(ArgumentError::EmptyGradient))
    ));
    assert!(runtime.transfers().await.is_empty());
}

#[tokio::test]
async fn test_dense_compressor_round_trip() {
    let (_, layer) = layer(
        alice(),
        Some(Arc::new(Sum)),
        Some(Arc::new(QuantizedZeroPoint::new(8))),
    );

    let (output, context) = layer
        .forward(envelopes(&parties(), &[2, 2]), 0, None)
        .await
        .unwrap();
    let fused = output.into_fused().unwrap().into_inner();
    assert_eq!(
        fused.hidden.into_single().unwrap().into_array().unwrap(),
        NumericArray::from_elem(IxDyn(&[2, 2]), 6.)
    );
    let sparse = context.sparse().unwrap().value();
    assert!(sparse.masks().is_none());
    assert_eq!(sparse.compressed(), &[false]);

    let gradient = DeviceObject::new(alice(), vec![filled(&[2, 2], 1.)]);
    let gradients = layer.backward(gradient, context, None).await.unwrap();
    for party in parties() {
        assert_eq!(
            single(&gradients[&party]),
            NumericArray::ones(IxDyn(&[2, 2]))
        );
    }
}

#[tokio::test]
async fn test_compression_reduces_wire_bytes() {
    let data = || {
        let values = (1..=256).map(|x| x as f32).collect::<Vec<_>>();
        let hidden = NumericArray::from_shape_vec(IxDyn(&[16, 16]), values).unwrap();
        vec![
            envelope(&alice(), Tensor::Dense(hidden.clone())),
            envelope(&bob(), Tensor::Dense(hidden)),
        ]
        .into_iter()
        .collect::<PartyMap<_>>()
    };
    let bytes = |compressor: Option<Arc<dyn Compressor>>| async move {
        let runtime = LocalRuntime::new();
        let layer = AggLayer::new(
            runtime.clone(),
            alice(),
            vec![alice(), bob()],
            alice(),
            Some(Arc::new(Sum)),
            Backend::Torch,
            compressor,
        )
        .unwrap();
        layer.forward(data(), 0, None).await.unwrap();
        runtime.transferred_bytes(&bob(), &alice()).await
    };

    let compressor: Arc<dyn Compressor> = Arc::new(TopkSparse::new(0.9));
    let plain = bytes(None).await;
    let compressed = bytes(Some(compressor)).await;
    assert!(compressed < plain / 2);
}

#[tokio::test]
async fn test_losses_in_party_order() {
    let (_, layer) = layer(Device::secure_compute("spu"), Some(Arc::new(Sum)), None);

    let data = vec![
        (
            alice(),
            DeviceObject::new(
                alice(),
                ForwardData::new(filled(&[1], 1.), Some(Losses::Scalar(0.5))),
            ),
        ),
        envelope(&bob(), filled(&[1], 2.)),
        (
            carol(),
            DeviceObject::new(
                carol(),
                ForwardData::new(filled(&[1], 3.), Some(Losses::Vector(vec![1., 2.]))),
            ),
        ),
    ]
    .into_iter()
    .collect();
    let (output, context) = layer.forward(data, 0, None).await.unwrap();

    let expected = vec![
        Some(Losses::Scalar(0.5)),
        None,
        Some(Losses::Vector(vec![1., 2.])),
    ];
    assert!(context.losses().is_on(&alice()));
    assert_eq!(context.losses().value(), &expected);
    assert_eq!(
        output.into_fused().unwrap().into_inner().losses,
        Some(Losses::PerParty(expected))
    );
}

#[tokio::test]
async fn test_passthrough_scenario() {
    let mut layer = AggLayer::new(
        LocalRuntime::new(),
        alice(),
        parties(),
        alice(),
        None,
        Backend::Torch,
        None,
    )
    .unwrap();
    layer
        .set_basenet_output_num(
            vec![(alice(), 2), (bob(), 3), (carol(), 1)]
                .into_iter()
                .collect(),
        )
        .unwrap();
    let tensors = |range: std::ops::Range<usize>| {
        range
            .map(|i| filled(&[1], i as f32))
            .collect::<Vec<_>>()
    };

    let data = vec![
        envelope(&alice(), tensors(0..2)),
        envelope(&bob(), tensors(2..5)),
        envelope(&carol(), filled(&[1], 5.)),
    ]
    .into_iter()
    .collect();
    let (output, context) = layer.forward(data, 0, None).await.unwrap();
    let hiddens = output.into_passthrough().unwrap();
    assert!(hiddens.is_on(&alice()));
    assert_eq!(hiddens.into_inner(), tensors(0..6));
    assert!(context.hiddens().is_empty());

    let gradient = DeviceObject::new(alice(), tensors(0..6));
    let gradients = layer.backward(gradient, context, None).await.unwrap();
    for (party, range) in vec![(alice(), 0..2), (bob(), 2..5), (carol(), 5..6)] {
        let gradient = &gradients[&party];
        assert!(gradient.is_on(&party));
        assert_eq!(gradient.value(), &Hidden::Multi(tensors(range)));
    }
}

#[tokio::test]
async fn test_passthrough_backward_errors() {
    let mut layer = AggLayer::new(
        LocalRuntime::new(),
        alice(),
        vec![alice(), bob()],
        alice(),
        None,
        Backend::Torch,
        None,
    )
    .unwrap();
    let (_, context) = layer
        .forward(envelopes(&[alice(), bob()], &[1]), 0, None)
        .await
        .unwrap();
    let gradient =
        |device: Device, len: usize| DeviceObject::new(device, vec![filled(&[1], 1.); len]);

    assert!(matches!(
        layer
            .backward(gradient(alice(), 2), context.clone(), None)
            .await,
        Err(AggLayerError::Argument(ArgumentError::OutputNumUnset))
    ));

    assert_eq!(
        layer.set_basenet_output_num(vec![(alice(), 1)].into_iter().collect()),
        Err(ArgumentError::MissingParty(bob()))
    );
    assert_eq!(
        layer.set_basenet_output_num(
            vec![(alice(), 1), (bob(), 1), (carol(), 1)]
                .into_iter()
                .collect()
        ),
        Err(ArgumentError::UnknownParty(carol()))
    );
    layer
        .set_basenet_output_num(vec![(alice(), 1), (bob(), 1)].into_iter().collect())
        .unwrap();

    assert!(matches!(
        layer
            .backward(gradient(bob(), 2), context.clone(), None)
            .await,
        Err(AggLayerError::Argument(ArgumentError::GradientMisplaced { expected, found }))
            if expected == alice() && found == bob()
    ));
    assert!(matches!(
        layer
            .backward(gradient(alice(), 3), context.clone(), None)
            .await,
        Err(AggLayerError::Argument(ArgumentError::OutputNumMismatch {
            expected: 2,
            got: 3
        }))
    ));
    assert!(layer
        .backward(gradient(alice(), 2), context, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_rounds_do_not_interfere() {
    let layer = AggLayer::new(
        LocalRuntime::new(),
        alice(),
        vec![alice(), bob()],
        alice(),
        Some(Arc::new(Concat::new(1))),
        Backend::Tensorflow,
        None,
    )
    .unwrap();
    let data = |alice_width: usize, bob_width: usize| {
        vec![
            envelope(&alice(), filled(&[2, alice_width], 1.)),
            envelope(&bob(), filled(&[2, bob_width], 2.)),
        ]
        .into_iter()
        .collect()
    };

    let (first, first_context) = layer.forward(data(1, 2), 0, None).await.unwrap();
    let (second, second_context) = layer.forward(data(3, 1), 0, None).await.unwrap();
    assert_eq!(first_context.round(), 0);
    assert_eq!(second_context.round(), 1);
    let shape = |output: crate::agglayer::ForwardOutput| {
        output
            .into_fused()
            .unwrap()
            .into_inner()
            .hidden
            .into_single()
            .unwrap()
            .shape()
            .to_vec()
    };
    assert_eq!(shape(first), vec![2, 3]);
    assert_eq!(shape(second), vec![2, 4]);

    let gradient = |width: usize| DeviceObject::new(alice(), vec![filled(&[2, width], 1.)]);
    let gradients = layer
        .backward(gradient(3), first_context, None)
        .await
        .unwrap();
    assert_eq!(single(&gradients[&alice()]).shape(), &[2, 1]);
    assert_eq!(single(&gradients[&bob()]).shape(), &[2, 2]);

    let gradients = layer
        .backward(gradient(4), second_context, None)
        .await
        .unwrap();
    assert_eq!(single(&gradients[&alice()]).shape(), &[2, 3]);
    assert_eq!(single(&gradients[&bob()]).shape(), &[2, 1]);
}

#[tokio::test]
async fn test_foreign_context() {
    let (_, first) = layer(alice(), Some(Arc::new(Sum)), None);
    let (_, second) = layer(alice(), Some(Arc::new(Sum)), None);

    let (_, context) = first
        .forward(envelopes(&parties(), &[1]), 0, None)
        .await
        .unwrap();
    let gradient = DeviceObject::new(alice(), vec![filled(&[1], 1.)]);
    assert!(matches!(
        second.backward(gradient, context, None).await,
        Err(AggLayerError::Argument(ArgumentError::ForeignContext))
    ));
}

#[tokio::test]
async fn test_argument_errors() {
    let (_, layer) = layer(alice(), Some(Arc::new(Sum)), None);
    let argument_error = |res: Result<_, AggLayerError>| match res {
        Err(AggLayerError::Argument(err)) => err,
        _ => panic!("expected an argument error"),
    };

    assert_eq!(
        argument_error(layer.forward(PartyMap::new(), 0, None).await.map(|_| ())),
        ArgumentError::EmptyData
    );

    let mut data = envelopes(&parties(), &[1]);
    data.extend(vec![envelope(&Device::plain("dave"), filled(&[1], 4.))]);
    assert_eq!(
        argument_error(layer.forward(data, 0, None).await.map(|_| ())),
        ArgumentError::UnknownParty(Device::plain("dave"))
    );

    assert_eq!(
        argument_error(
            layer
                .forward(envelopes(&[alice(), bob()], &[1]), 0, None)
                .await
                .map(|_| ())
        ),
        ArgumentError::MissingParty(carol())
    );

    let mut data = envelopes(&parties(), &[1]);
    data.extend(vec![envelope(&bob(), vec![filled(&[1], 2.), filled(&[1], 2.)])]);
    assert_eq!(
        argument_error(layer.forward(data, 0, None).await.map(|_| ())),
        ArgumentError::MultiHiddenInFusion {
            party: bob(),
            count: 2
        }
    );

    let weights = Some(vec![WeightInput::Local(Weight::Scalar(1.))]);
    assert_eq!(
        argument_error(
            layer
                .forward(envelopes(&parties(), &[1]), 0, weights)
                .await
                .map(|_| ())
        ),
        ArgumentError::WeightLengthMismatch {
            expected: 3,
            got: 1
        }
    );

    let (_, context) = layer
        .forward(envelopes(&parties(), &[1]), 0, None)
        .await
        .unwrap();
    assert_eq!(
        argument_error(
            layer
                .backward(DeviceObject::new(alice(), Vec::new()), context, None)
                .await
                .map(|_| ())
        ),
        ArgumentError::EmptyGradient
    );

    assert_eq!(
        argument_error(layer.scatter(vec![]).await.map(|_| ())),
        ArgumentError::PartyCountMismatch {
            expected: 3,
            got: 0
        }
    );
}

#[tokio::test]
async fn test_method_failure_is_a_runtime_error() {
    let (_, layer) = layer(alice(), Some(Arc::new(Sum)), None);
    let data = vec![
        envelope(&alice(), filled(&[1], 1.)),
        envelope(&bob(), filled(&[2], 1.)),
        envelope(&carol(), filled(&[1], 1.)),
    ]
    .into_iter()
    .collect();

    assert!(matches!(
        layer.forward(data, 0, None).await,
        Err(AggLayerError::Runtime(_))
    ));
}
