use verdine::{
    CanopyTrait, InversionEngine, LookupTable, ObservationGeometry, ParameterSpec,
    PixelObservation, RetrievalConfig, SamplingMethod,
};

fn single_trait_config() -> RetrievalConfig {
    RetrievalConfig {
        rtm_params: vec![ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0)],
        lut_size: 500,
        n_solutions: 20,
        sampling_method: SamplingMethod::Lhs,
        traits: vec![CanopyTrait::Lai],
        seed: 42,
        ..RetrievalConfig::default()
    }
}

fn geometry() -> ObservationGeometry {
    ObservationGeometry::new(35.0, 5.0, 120.0)
}

#[test]
fn test_end_to_end_single_trait_retrieval() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = single_trait_config();
    let lut = LookupTable::build(&config, &geometry()).expect("LUT build failed");
    assert_eq!(lut.len(), 500);

    // synthetic pixel: the exact spectrum of LUT entry #17
    let entry = lut.entry(17);
    let true_lai = entry.get(CanopyTrait::Lai).unwrap();
    let pixel = PixelObservation {
        reflectance: entry.spectrum.to_vec(),
        geometry: *lut.geometry(),
    };

    let engine = InversionEngine::new(&config, &lut).expect("engine setup failed");

    // entry #17 must rank first at distance zero
    let candidates = engine.rank_candidates(&pixel).unwrap();
    assert_eq!(candidates.len(), 20);
    assert_eq!(candidates.best().index, 17);
    assert_eq!(candidates.best().distance, 0.0);

    // the aggregate must recover the true LAI within the ensemble spread
    let estimates = engine.invert(&pixel).unwrap();
    let lai = estimates[&CanopyTrait::Lai];
    assert_eq!(lai.n_solutions, 20);
    println!(
        "true lai = {:.3}, estimate = {:.3} +/- {:.3}",
        true_lai, lai.value, lai.dispersion
    );
    // the floor covers the one-sided candidate window at the prior edges
    assert!(
        (lai.value - true_lai).abs() <= lai.dispersion.max(0.2),
        "estimate {} +/- {} does not cover true value {}",
        lai.value,
        lai.dispersion,
        true_lai
    );
}

#[test]
fn test_top1_is_subset_of_every_topk() {
    let config = single_trait_config();
    let lut = LookupTable::build(&config, &geometry()).unwrap();
    let engine = InversionEngine::new(&config, &lut).unwrap();

    let pixel = PixelObservation {
        reflectance: lut.entry(123).spectrum.to_vec(),
        geometry: *lut.geometry(),
    };

    let best = engine.rank_with(&pixel, 1).unwrap().best().index;
    for k in [1, 2, 10, 100, 500] {
        let topk = engine.rank_with(&pixel, k).unwrap();
        assert!(
            topk.iter().any(|c| c.index == best),
            "top-1 entry {} missing from top-{}",
            best,
            k
        );
    }
}

#[test]
fn test_repeated_inversion_is_identical() {
    let config = single_trait_config();
    let lut = LookupTable::build(&config, &geometry()).unwrap();
    let engine = InversionEngine::new(&config, &lut).unwrap();

    let pixel = PixelObservation {
        reflectance: lut.entry(42).spectrum.to_vec(),
        geometry: *lut.geometry(),
    };

    let first = engine.invert(&pixel).unwrap()[&CanopyTrait::Lai];
    for _ in 0..5 {
        let again = engine.invert(&pixel).unwrap()[&CanopyTrait::Lai];
        assert_eq!(first, again);
    }
}

#[test]
fn test_exact_match_single_solution_zero_dispersion() {
    let mut config = single_trait_config();
    config.n_solutions = 1;
    let lut = LookupTable::build(&config, &geometry()).unwrap();
    let engine = InversionEngine::new(&config, &lut).unwrap();

    let entry = lut.entry(99);
    let pixel = PixelObservation {
        reflectance: entry.spectrum.to_vec(),
        geometry: *lut.geometry(),
    };
    let estimate = engine.invert(&pixel).unwrap()[&CanopyTrait::Lai];
    assert_eq!(estimate.dispersion, 0.0);
    assert_eq!(estimate.value, entry.get(CanopyTrait::Lai).unwrap());
}

#[test]
fn test_lut_rebuild_with_same_seed_matches() {
    let config = single_trait_config();
    let a = LookupTable::build(&config, &geometry()).unwrap();
    let b = LookupTable::build(&config, &geometry()).unwrap();
    assert_eq!(a.len(), b.len());
    assert_eq!(a.spectra(), b.spectra());
}

#[test]
fn test_multi_trait_retrieval() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = RetrievalConfig {
        rtm_params: vec![
            ParameterSpec::uniform(CanopyTrait::Lai, 0.0, 8.0),
            ParameterSpec::uniform(CanopyTrait::Cab, 10.0, 80.0),
            ParameterSpec::gaussian(CanopyTrait::Cw, 0.02, 0.008, 0.001, 0.05),
            ParameterSpec::fixed(CanopyTrait::Cbrown, 0.0),
        ],
        lut_size: 300,
        n_solutions: 15,
        sampling_method: SamplingMethod::Lhs,
        traits: vec![CanopyTrait::Lai, CanopyTrait::Cab],
        seed: 7,
        ..RetrievalConfig::default()
    };
    let lut = LookupTable::build(&config, &geometry()).unwrap();
    let engine = InversionEngine::new(&config, &lut).unwrap();

    let entry = lut.entry(200);
    let pixel = PixelObservation {
        reflectance: entry.spectrum.to_vec(),
        geometry: *lut.geometry(),
    };
    let estimates = engine.invert(&pixel).unwrap();
    assert!(estimates.contains_key(&CanopyTrait::Lai));
    assert!(estimates.contains_key(&CanopyTrait::Cab));
    // fixed parameters were not requested and must not appear
    assert!(!estimates.contains_key(&CanopyTrait::Cbrown));

    for (name, estimate) in &estimates {
        println!(
            "{}: {:.3} +/- {:.3} (n = {})",
            name, estimate.value, estimate.dispersion, estimate.n_solutions
        );
        assert!(estimate.value.is_finite());
        assert!(estimate.dispersion >= 0.0);
    }
}

#[test]
fn test_frs_and_lhs_both_cover_the_prior() {
    for method in [SamplingMethod::Frs, SamplingMethod::Lhs] {
        let config = RetrievalConfig {
            sampling_method: method,
            ..single_trait_config()
        };
        let lut = LookupTable::build(&config, &geometry()).unwrap();
        let column = lut.trait_column(CanopyTrait::Lai).unwrap();
        let lo = column.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = column.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        // 500 draws over uniform[0, 8] should span most of the range
        assert!(lo < 0.5, "{:?}: min sampled lai = {}", method, lo);
        assert!(hi > 7.5, "{:?}: max sampled lai = {}", method, hi);
    }
}
