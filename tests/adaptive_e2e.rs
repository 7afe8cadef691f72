//! End-to-end serving tests: artifact persistence, forced fallbacks, round accounting.

mod common;

use common::{calibration_set, hardness, HardnessOracle};
use riskann::calibration::{
    ArtifactError, CalibrationArtifact, CalibrationSession, NormalizationBounds, Regularization,
    RiskControl,
};
use riskann::{search_fixed_effort, AdaptiveSearcher, EffortSchedule, RetrieveError};

const K: usize = 10;

fn schedule() -> EffortSchedule {
    EffortSchedule::linear(1, 1001, 20).unwrap()
}

fn artifact_with_lambda(lambda_hat: f32) -> CalibrationArtifact {
    CalibrationArtifact::new(
        lambda_hat,
        Regularization::default(),
        NormalizationBounds::new(1.0, 2.0).unwrap(),
        schedule(),
    )
    .unwrap()
}

#[test]
fn zero_threshold_sends_everyone_to_max_effort() {
    // Every query has a strictly positive score at every position: either a
    // positive miss fraction or a positive position penalty.
    let queries = hardness(300, 0.05, 1.0, 1);
    let index = HardnessOracle::default();
    let mut searcher = AdaptiveSearcher::new(&index, artifact_with_lambda(0.0), K).unwrap();
    let results = searcher.search(&queries).unwrap();

    assert!(results.efforts().iter().all(|&e| e == 1001));
    assert!(results.iter().all(|r| r.round == 50));
    assert_eq!(results.rounds().len(), 51);
    assert!(results.rounds()[..50].iter().all(|r| r.resolved == 0));
    assert_eq!(results.rounds()[50].resolved, 300);
    assert_eq!(results.mean_effort(), 1001.0);
}

#[test]
fn huge_threshold_resolves_everyone_in_round_zero() {
    let queries = hardness(300, 0.0, 1.0, 2);
    let index = HardnessOracle::default();
    let mut searcher = AdaptiveSearcher::new(&index, artifact_with_lambda(100.0), K).unwrap();
    let results = searcher.search(&queries).unwrap();

    assert!(results.efforts().iter().all(|&e| e == 1));
    assert_eq!(results.rounds().len(), 1);
    assert_eq!(results.rounds()[0].resolved, 300);

    // Same answers as a fixed search at the first effort.
    let fixed = search_fixed_effort(&index, &queries, K, 1).unwrap();
    assert_eq!(results.labels(), fixed.labels());
    assert_eq!(results.distances(), fixed.distances());
}

#[test]
fn every_query_resolves_exactly_once() {
    let queries = hardness(1000, 0.0, 1.0, 3);
    let index = HardnessOracle::default();
    let mut searcher = AdaptiveSearcher::new(&index, artifact_with_lambda(0.3), K).unwrap();
    let results = searcher.search(&queries).unwrap();

    assert_eq!(results.len(), 1000);
    let resolved: usize = results.rounds().iter().map(|r| r.resolved).sum();
    assert_eq!(resolved, 1000);

    // Active set shrinks by exactly the number resolved each round.
    for pair in results.rounds().windows(2) {
        assert_eq!(pair[1].active, pair[0].active - pair[0].resolved);
    }
    assert_eq!(results.rounds()[0].active, 1000);

    // Rounds are consecutive schedule positions with their scheduled efforts.
    let sched = schedule();
    for (i, round) in results.rounds().iter().enumerate() {
        assert_eq!(round.position, i);
        assert_eq!(Some(round.effort), sched.get(i));
    }

    // No padding left in any answer; each query's effort matches its round.
    for r in results.iter() {
        assert!(r.labels.iter().all(|&l| l != u32::MAX));
        assert_eq!(Some(r.effort), sched.get(r.round));
    }
}

#[test]
fn reloaded_artifact_serves_identically() {
    let calib = hardness(1500, 0.0, 1.0, 40);
    let set = calibration_set(calib, K);
    let index = HardnessOracle::default();
    let session = CalibrationSession::build(&index, &set, schedule(), K).unwrap();
    let cal = session
        .calibrate(Regularization::default(), &RiskControl::new(0.1))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibrated_params.txt");
    cal.artifact.save(&path).unwrap();
    let loaded = CalibrationArtifact::load(&path).unwrap();
    assert_eq!(loaded, cal.artifact);

    let queries = hardness(700, 0.0, 1.0, 41);
    let mut original = AdaptiveSearcher::new(&index, cal.artifact.clone(), K).unwrap();
    let mut reloaded = AdaptiveSearcher::new(&index, loaded, K).unwrap();
    let a = original.search(&queries).unwrap();
    let b = reloaded.search(&queries).unwrap();

    assert_eq!(a.efforts(), b.efforts());
    assert_eq!(a.labels(), b.labels());
    assert_eq!(a.distances(), b.distances());
    assert_eq!(a.rounds(), b.rounds());
}

#[test]
fn adaptive_effort_never_exceeds_fixed_max() {
    let queries = hardness(500, 0.0, 1.0, 5);
    let index = HardnessOracle::default();
    for lambda_hat in [0.0, 0.05, 0.2, 0.6, 1.2] {
        let mut searcher =
            AdaptiveSearcher::new(&index, artifact_with_lambda(lambda_hat), K).unwrap();
        let adaptive = searcher.search(&queries).unwrap();
        let fixed = searcher.search_fixed_effort(&queries, 1001).unwrap();
        assert!(adaptive.mean_effort() <= fixed.mean_effort());
        assert!(adaptive.total_effort() <= fixed.total_effort());
    }
}

#[test]
fn loading_a_missing_or_corrupt_artifact_fails() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("absent.txt");
    let err: RetrieveError = CalibrationArtifact::load(&missing).unwrap_err().into();
    assert!(matches!(err, RetrieveError::Artifact(ArtifactError::NotFound(_))));

    let corrupt = dir.path().join("corrupt.txt");
    std::fs::write(&corrupt, "0.2\n0.01\ntwo\n1\n2\n1\n5\n").unwrap();
    assert!(matches!(
        CalibrationArtifact::load(&corrupt),
        Err(ArtifactError::Corrupt { line: 3, .. })
    ));
}

#[test]
fn out_of_range_distances_are_clamped() {
    // Bounds narrower than what serving sees: scores clamp to [0, 1] instead of
    // escaping the range lambda_hat was chosen on.
    let artifact = CalibrationArtifact::new(
        0.5,
        Regularization::none(),
        NormalizationBounds::new(1.2, 1.3).unwrap(),
        EffortSchedule::new(vec![1, 100, 400]).unwrap(),
    )
    .unwrap();
    let index = HardnessOracle::default();
    let mut searcher = AdaptiveSearcher::new(&index, artifact, K).unwrap();

    // h = 0.9 at effort 1: k-th distance ~1.9, clamps to 1.0; at 100: ~1.45, clamps
    // to 1.0; at 400: exactly 1.0, clamps to 0.0 and resolves.
    // h = 0.1 at effort 1: ~1.1, clamps to 0.0 and resolves.
    let results = searcher.search(&[0.9, 0.1]).unwrap();
    assert_eq!(results.efforts(), &[400, 1]);
}

#[test]
fn serving_rejects_bad_queries() {
    let index = HardnessOracle::default();
    assert!(matches!(
        AdaptiveSearcher::new(&index, artifact_with_lambda(0.1), 0),
        Err(RetrieveError::InvalidParameter(_))
    ));
    let mut searcher = AdaptiveSearcher::new(&index, artifact_with_lambda(0.1), K).unwrap();
    assert!(matches!(searcher.search(&[]), Err(RetrieveError::EmptyQuery)));
}
