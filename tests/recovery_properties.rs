use approx::assert_abs_diff_eq;
use fecoef::bipartite::{BipartiteInput, recover_bipartite};
use fecoef::config::{FixedPointConfig, RecoveryConfig};
use fecoef::deriv::solve_cluster_derivative;
use fecoef::general::recover_general;
use fecoef::shared::index::ObservationOrdering;
use fecoef::types::{Membership, reconstruct_sum_fe};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// A synthetic panel whose `sum_fe` is exactly additive in its categories.
struct Panel {
    membership: Membership,
    sum_fe: Array1<f64>,
}

fn panel_from_rows(rows: Vec<Vec<usize>>, sizes: Vec<usize>, rng: &mut StdRng) -> Panel {
    let truth: Vec<Vec<f64>> = sizes
        .iter()
        .map(|&n| (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect())
        .collect();
    let sum_fe = rows
        .iter()
        .map(|row| row.iter().zip(&truth).map(|(&c, coef)| coef[c]).sum::<f64>())
        .collect();
    let n_dims = sizes.len();
    let ids = Array2::from_shape_vec((rows.len(), n_dims), rows.concat()).unwrap();
    Panel {
        membership: Membership::new(ids, sizes).unwrap(),
        sum_fe,
    }
}

/// Two-way panel made of independent blocks of `(n_first, n_second, n_obs)`.
/// Every category is touched at least once; blocks may split further.
fn block_panel(blocks: &[(usize, usize, usize)], rng: &mut StdRng) -> Panel {
    let mut rows = Vec::new();
    let (mut offset_i, mut offset_j) = (0, 0);
    for &(ni, nj, n_obs) in blocks {
        assert!(n_obs >= ni.max(nj));
        for t in 0..n_obs {
            let (i, j) = if t < ni.max(nj) {
                (t % ni, t % nj)
            } else {
                (rng.gen_range(0..ni), rng.gen_range(0..nj))
            };
            rows.push(vec![offset_i + i, offset_j + j]);
        }
        offset_i += ni;
        offset_j += nj;
    }
    rows.shuffle(rng);
    panel_from_rows(rows, vec![offset_i, offset_j], rng)
}

/// Connected components of the two-way category graph.
fn count_components(membership: &Membership) -> usize {
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let n_first = membership.sizes()[0];
    let mut parent: Vec<usize> = (0..membership.total_categories()).collect();
    for obs in 0..membership.n_obs() {
        let a = find(&mut parent, membership.category(obs, 0));
        let b = find(&mut parent, n_first + membership.category(obs, 1));
        parent[a] = b;
    }
    (0..parent.len())
        .filter(|&x| find(&mut parent, x) == x)
        .count()
}

fn assert_reconstructs(panel: &Panel, coefficients: &[Array1<f64>]) {
    let fitted = reconstruct_sum_fe(&panel.membership, coefficients);
    for (f, s) in fitted.iter().zip(panel.sum_fe.iter()) {
        assert_abs_diff_eq!(*f, *s, epsilon = 1e-9);
    }
}

#[test]
fn bipartite_recovery_uses_one_reference_per_component() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..20 {
        let blocks: Vec<_> = (0..rng.gen_range(1..5))
            .map(|_| {
                let ni = rng.gen_range(1..12);
                let nj = rng.gen_range(1..8);
                (ni, nj, ni.max(nj) + rng.gen_range(0..30))
            })
            .collect();
        let panel = block_panel(&blocks, &mut rng);

        let input = BipartiteInput::from_observations(&panel.membership, panel.sum_fe.view())
            .unwrap();
        let result = recover_bipartite(&input, &RecoveryConfig::default()).unwrap();

        assert!(result.status.converged, "round {round}");
        assert_eq!(
            result.reference_counts(),
            [0, count_components(&panel.membership)],
            "round {round}"
        );
        assert_eq!(result.status.passes, count_components(&panel.membership));
        assert_reconstructs(&panel, &[result.values(0), result.values(1)]);
    }
}

#[test]
fn general_recovery_matches_bipartite_on_two_way_panels() {
    let mut rng = StdRng::seed_from_u64(11);
    for round in 0..20 {
        let blocks: Vec<_> = (0..rng.gen_range(1..4))
            .map(|_| {
                let ni = rng.gen_range(1..10);
                let nj = rng.gen_range(1..10);
                (ni, nj, ni.max(nj) + rng.gen_range(0..20))
            })
            .collect();
        let panel = block_panel(&blocks, &mut rng);
        let ordering = ObservationOrdering::from_membership(&panel.membership);

        let general = recover_general(
            &panel.membership,
            panel.sum_fe.view(),
            &ordering,
            &RecoveryConfig::default(),
        )
        .unwrap();
        let input = BipartiteInput::from_observations(&panel.membership, panel.sum_fe.view())
            .unwrap();
        let bipartite = recover_bipartite(&input, &RecoveryConfig::default()).unwrap();

        assert!(general.status.converged, "round {round}");
        assert_eq!(
            general.total_references(),
            bipartite.reference_counts().iter().sum::<usize>(),
            "round {round}"
        );
        assert_eq!(general.reference_counts[0], 0);
        assert_reconstructs(&panel, &general.coefficients);
    }
}

#[test]
fn three_way_factorial_needs_two_references() {
    let mut rng = StdRng::seed_from_u64(23);
    for round in 0..10 {
        let sizes = vec![
            rng.gen_range(1..6),
            rng.gen_range(1..6),
            rng.gen_range(1..6),
        ];
        let mut rows = Vec::new();
        for a in 0..sizes[0] {
            for b in 0..sizes[1] {
                for c in 0..sizes[2] {
                    for _ in 0..rng.gen_range(1..3) {
                        rows.push(vec![a, b, c]);
                    }
                }
            }
        }
        rows.shuffle(&mut rng);
        let panel = panel_from_rows(rows, sizes, &mut rng);
        let ordering = ObservationOrdering::from_membership(&panel.membership);

        let result = recover_general(
            &panel.membership,
            panel.sum_fe.view(),
            &ordering,
            &RecoveryConfig::default(),
        )
        .unwrap();

        assert!(result.status.converged, "round {round}");
        assert_eq!(result.status.passes, 1, "round {round}");
        assert_eq!(result.reference_counts, vec![0, 1, 1], "round {round}");
        assert_reconstructs(&panel, &result.coefficients);
    }
}

#[test]
fn recovery_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(3);
    let panel = block_panel(&[(8, 5, 30), (4, 6, 12)], &mut rng);
    let ordering = ObservationOrdering::from_membership(&panel.membership);
    let config = RecoveryConfig::default();

    let first = recover_general(&panel.membership, panel.sum_fe.view(), &ordering, &config)
        .unwrap();
    let second = recover_general(&panel.membership, panel.sum_fe.view(), &ordering, &config)
        .unwrap();
    assert_eq!(first.rows(), second.rows());

    let input = BipartiteInput::from_observations(&panel.membership, panel.sum_fe.view()).unwrap();
    let a = recover_bipartite(&input, &config).unwrap();
    let b = recover_bipartite(&input, &config).unwrap();
    assert_eq!(a.rows(), b.rows());
}

#[test]
fn nested_dimension_gets_its_own_references() {
    // Workers are nested in firms; years cross both.
    let mut rng = StdRng::seed_from_u64(5);
    let n_firms = 4;
    let workers_per_firm = 3;
    let n_years = 5;
    let mut rows = Vec::new();
    for firm in 0..n_firms {
        for w in 0..workers_per_firm {
            let worker = firm * workers_per_firm + w;
            for year in 0..n_years {
                rows.push(vec![worker, firm, year]);
            }
        }
    }
    rows.shuffle(&mut rng);
    let panel = panel_from_rows(rows, vec![n_firms * workers_per_firm, n_firms, n_years], &mut rng);
    let ordering = ObservationOrdering::from_membership(&panel.membership);

    let result = recover_general(
        &panel.membership,
        panel.sum_fe.view(),
        &ordering,
        &RecoveryConfig::default(),
    )
    .unwrap();

    assert!(result.status.converged);
    // One reference in years, plus one firm reference per firm (the firm
    // effect is absorbed by its workers).
    assert_eq!(result.total_references(), 1 + n_firms);
    assert_reconstructs(&panel, &result.coefficients);
}

#[test]
fn cluster_derivative_balances_every_category() {
    let mut rng = StdRng::seed_from_u64(17);
    let panel = block_panel(&[(6, 4, 40)], &mut rng);
    let n_obs = panel.membership.n_obs();
    let d2: Array1<f64> = (0..n_obs).map(|_| -rng.gen_range(0.2..2.0)).collect();
    let dx: Array1<f64> = (0..n_obs).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let init = Array1::<f64>::zeros(n_obs);
    let config = FixedPointConfig {
        tolerance: 1e-12,
        max_iterations: 200_000,
    };

    let solution =
        solve_cluster_derivative(&panel.membership, d2.view(), dx.view(), init.view(), &config)
            .unwrap();
    assert!(solution.converged);

    for dimension in 0..2 {
        let mut residuals = vec![0.0; panel.membership.sizes()[dimension]];
        for obs in 0..n_obs {
            residuals[panel.membership.category(obs, dimension)] +=
                dx[obs] + solution.values[obs] * d2[obs];
        }
        for residual in residuals {
            assert_abs_diff_eq!(residual, 0.0, epsilon = 1e-8);
        }
    }
}
