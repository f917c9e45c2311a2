/// Result of a bounded maximization.
#[derive(Debug, Clone)]
pub struct Optimum {
    pub params: Vec<f64>,
    pub value: f64,
    /// Number of objective evaluations.
    pub iterations: usize,
    pub converged: bool,
    /// Spread of objective values over the final simplex.
    pub spread: f64,
}

/// Bounded derivative-free maximizer.
///
/// `objective` may return `None` for points where it is undefined; such
/// points are treated as infinitely bad. `lower` gives a per-parameter lower
/// bound; proposals are projected onto the box before evaluation.
pub trait Maximizer: Send + Sync {
    fn maximize(
        &self,
        objective: &dyn Fn(&[f64]) -> Option<f64>,
        initial: &[f64],
        lower: &[f64],
    ) -> Optimum;
}

/// Nelder-Mead simplex search with box projection and one restart.
#[derive(Debug, Clone)]
pub struct NelderMead {
    pub max_evaluations: usize,
    /// Relative spread of simplex values at which the search stops.
    pub f_tolerance: f64,
    /// Largest vertex distance from the best point at which the search stops.
    pub x_tolerance: f64,
    /// Initial simplex edge, relative to the starting value (absolute when
    /// the starting value is zero).
    pub initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            f_tolerance: 1e-8,
            x_tolerance: 1e-6,
            initial_step: 0.2,
        }
    }
}

impl NelderMead {
    pub fn new(max_evaluations: usize, tolerance: f64) -> Self {
        Self {
            max_evaluations,
            f_tolerance: tolerance,
            ..Self::default()
        }
    }
}

struct Search<'a> {
    objective: &'a dyn Fn(&[f64]) -> Option<f64>,
    lower: &'a [f64],
    evaluations: usize,
}

impl Search<'_> {
    fn project(&self, x: &mut [f64]) {
        for (xi, &lo) in x.iter_mut().zip(self.lower) {
            if *xi < lo {
                *xi = lo;
            }
        }
    }

    /// Value to be minimized: the negated objective.
    fn cost(&mut self, x: &[f64]) -> f64 {
        self.evaluations += 1;
        match (self.objective)(x) {
            Some(v) if v.is_finite() => -v,
            _ => f64::INFINITY,
        }
    }
}

struct Run {
    best: Vec<f64>,
    cost: f64,
    spread: f64,
    converged: bool,
}

impl NelderMead {
    /// One simplex run from `start`; returns the best vertex, its cost and
    /// whether the tolerances were met.
    fn run(&self, search: &mut Search<'_>, start: &[f64]) -> Run {
        let dim = start.len();
        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
        simplex.push(start.to_vec());
        for i in 0..dim {
            let mut v = start.to_vec();
            let step = if v[i].abs() > 1e-8 {
                self.initial_step * v[i].abs()
            } else {
                self.initial_step
            };
            v[i] += step;
            search.project(&mut v);
            simplex.push(v);
        }
        let mut costs: Vec<f64> = simplex.iter().map(|v| search.cost(v)).collect();

        loop {
            let mut order: Vec<usize> = (0..=dim).collect();
            order.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
            simplex = order.iter().map(|&i| simplex[i].clone()).collect();
            costs = order.iter().map(|&i| costs[i]).collect();

            let best = costs[0];
            let worst = costs[dim];
            let f_spread = (worst - best).abs();
            let x_spread = simplex[1..]
                .iter()
                .map(|v| {
                    v.iter()
                        .zip(&simplex[0])
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0, f64::max)
                })
                .fold(0.0, f64::max);
            if best.is_finite()
                && f_spread <= self.f_tolerance * (1.0 + best.abs())
                && x_spread <= self.x_tolerance
            {
                return Run {
                    best: simplex[0].clone(),
                    cost: best,
                    spread: f_spread,
                    converged: true,
                };
            }
            if search.evaluations >= self.max_evaluations {
                return Run {
                    best: simplex[0].clone(),
                    cost: best,
                    spread: f_spread,
                    converged: false,
                };
            }

            let centroid: Vec<f64> = (0..dim)
                .map(|j| simplex[..dim].iter().map(|v| v[j]).sum::<f64>() / dim as f64)
                .collect();
            let toward = |coef: f64| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(&simplex[dim])
                    .map(|(c, w)| c + coef * (w - c))
                    .collect()
            };

            let mut reflected = toward(-1.0);
            search.project(&mut reflected);
            let f_reflected = search.cost(&reflected);

            if f_reflected < costs[0] {
                let mut expanded = toward(-2.0);
                search.project(&mut expanded);
                let f_expanded = search.cost(&expanded);
                if f_expanded < f_reflected {
                    simplex[dim] = expanded;
                    costs[dim] = f_expanded;
                } else {
                    simplex[dim] = reflected;
                    costs[dim] = f_reflected;
                }
                continue;
            }
            if f_reflected < costs[dim - 1] {
                simplex[dim] = reflected;
                costs[dim] = f_reflected;
                continue;
            }

            let (mut contracted, outside) = if f_reflected < costs[dim] {
                (toward(-0.5), true)
            } else {
                (toward(0.5), false)
            };
            search.project(&mut contracted);
            let f_contracted = search.cost(&contracted);
            let accept = if outside {
                f_contracted <= f_reflected
            } else {
                f_contracted < costs[dim]
            };
            if accept {
                simplex[dim] = contracted;
                costs[dim] = f_contracted;
                continue;
            }

            // Shrink toward the best vertex.
            for i in 1..=dim {
                let shrunk: Vec<f64> = simplex[i]
                    .iter()
                    .zip(&simplex[0])
                    .map(|(v, b)| b + 0.5 * (v - b))
                    .collect();
                costs[i] = search.cost(&shrunk);
                simplex[i] = shrunk;
            }
        }
    }
}

impl Maximizer for NelderMead {
    fn maximize(
        &self,
        objective: &dyn Fn(&[f64]) -> Option<f64>,
        initial: &[f64],
        lower: &[f64],
    ) -> Optimum {
        let mut search = Search {
            objective,
            lower,
            evaluations: 0,
        };
        let mut start = initial.to_vec();
        search.project(&mut start);

        if start.is_empty() {
            let cost = search.cost(&start);
            return Optimum {
                params: start,
                value: -cost,
                iterations: search.evaluations,
                converged: cost.is_finite(),
                spread: 0.0,
            };
        }

        let mut run = self.run(&mut search, &start);
        // Restart from the optimum: a collapsed simplex can stall early,
        // particularly against a bound.
        if run.converged {
            let again = self.run(&mut search, &run.best);
            if again.cost < run.cost {
                run = again;
            }
        }
        log::debug!(
            "Nelder-Mead: {} evaluations, converged = {}, value = {:.6}",
            search.evaluations,
            run.converged,
            -run.cost
        );

        Optimum {
            value: -run.cost,
            iterations: search.evaluations,
            converged: run.converged && run.cost.is_finite(),
            spread: run.spread,
            params: run.best,
        }
    }
}
