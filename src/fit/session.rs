use crate::error::FitError;
use crate::fit::{FitAction, FitMatrices, ParameterFamily, ParameterFamilyTrait};
use crate::tree::CompartmentTree;

use conv::ConvUtil;

/// Stored fit problems of one parameter family, solved jointly by
/// [CompartmentTree::run_fit_session]
///
/// The session is idle until the first problem is stored, which fixes the parameter family until
/// the session is committed or reset.
#[derive(Clone, Debug, Default)]
pub struct FitSession {
    family: Option<ParameterFamily>,
    stored: Vec<(FitMatrices, f64)>,
}

impl FitSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the parameter family, a no-op if the session's family shares its parameters
    pub fn begin(&mut self, family: ParameterFamily) -> Result<(), FitError> {
        match &self.family {
            Some(stored) if !stored.shares_parameters(&family) => Err(FitError::FamilyMismatch {
                stored: stored.describe(),
                requested: family.describe(),
            }),
            Some(_) => Ok(()),
            None => {
                self.family = Some(family);
                Ok(())
            }
        }
    }

    /// Append a problem with relative weight `weight`
    pub fn store(
        &mut self,
        family: ParameterFamily,
        matrices: FitMatrices,
        weight: f64,
    ) -> Result<(), FitError> {
        if weight < 0.0 || weight.is_nan() {
            return Err(FitError::NegativeWeight(weight));
        }
        if let Some((first, _)) = self.stored.first() {
            if first.n_params() != matrices.n_params() {
                return Err(FitError::LengthMismatch {
                    what: "number of unknowns",
                    expected: first.n_params(),
                    actual: matrices.n_params(),
                });
            }
        }
        self.begin(family)?;
        self.stored.push((matrices, weight));
        Ok(())
    }

    /// Drop every stored problem and the parameter family
    pub fn reset(&mut self) {
        self.family = None;
        self.stored.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Number of stored problems
    pub fn len(&self) -> usize {
        self.stored.len()
    }

    pub fn family(&self) -> Option<&ParameterFamily> {
        self.family.as_ref()
    }

    /// The stored problems as one stacked problem, the session is left as is
    ///
    /// Every problem is scaled by `sqrt(weight / n_samples)` so that its squared residual enters
    /// the joint problem with weight `weight`, independent of its size. Returns `None` for an
    /// empty session.
    pub fn stacked(&self) -> Result<Option<(ParameterFamily, FitMatrices)>, FitError> {
        let Some(family) = &self.family else {
            return Ok(None);
        };
        if self.stored.is_empty() {
            return Ok(None);
        }
        let parts: Vec<_> = self
            .stored
            .iter()
            .map(|(matrices, weight)| {
                let n_samples = matrices
                    .n_samples()
                    .value_as::<f64>()
                    .unwrap_or(f64::INFINITY);
                matrices.clone().scaled(f64::sqrt(weight / n_samples))
            })
            .collect();
        Ok(Some((family.clone(), FitMatrices::concatenate(&parts)?)))
    }

    /// Take the stored problems as one stacked problem and reset the session
    pub fn commit(&mut self) -> Result<Option<(ParameterFamily, FitMatrices)>, FitError> {
        let stacked = self.stacked()?;
        self.reset();
        Ok(stacked)
    }
}

fn check_n_params(
    tree: &CompartmentTree,
    family: &ParameterFamily,
    matrices: &FitMatrices,
) -> Result<(), FitError> {
    let expected = family.n_params(tree);
    if matrices.n_params() != expected {
        return Err(FitError::LengthMismatch {
            what: "number of unknowns",
            expected,
            actual: matrices.n_params(),
        });
    }
    Ok(())
}

impl CompartmentTree {
    /// Solve every problem stored in the tree's own session and write the result into the tree
    ///
    /// An empty session is a no-op that only emits a warning. The session is reset only when
    /// the fit succeeds.
    pub fn run_fit(&mut self) -> Result<(), FitError> {
        let stacked = self.fit_data().stacked()?;
        self.solve_stacked(stacked)?;
        self.fit_data_mut().reset();
        Ok(())
    }

    /// Solve every problem stored in `session`, write the result into the tree and reset
    /// `session`
    ///
    /// On error `session` keeps its problems.
    pub fn run_fit_session(&mut self, session: &mut FitSession) -> Result<(), FitError> {
        self.solve_stacked(session.stacked()?)?;
        session.reset();
        Ok(())
    }

    fn solve_stacked(
        &mut self,
        stacked: Option<(ParameterFamily, FitMatrices)>,
    ) -> Result<(), FitError> {
        let Some((family, matrices)) = stacked else {
            log::warn!("no fit matrices are stored, no fit has been performed");
            return Ok(());
        };
        check_n_params(self, &family, &matrices)?;
        let params = matrices.solve(self.config().solver)?;
        log::debug!("fitted {} with {} unknowns", family.describe(), params.len());
        family.to_tree(self, params.view())
    }

    /// Apply `action` to the problem of one fit call
    pub(crate) fn fit_res_action(
        &mut self,
        action: FitAction,
        family: ParameterFamily,
        matrices: FitMatrices,
        weight: f64,
    ) -> Result<Option<FitMatrices>, FitError> {
        match action {
            FitAction::Fit => {
                let params = matrices.solve(self.config().solver)?;
                family.to_tree(self, params.view())?;
                Ok(None)
            }
            FitAction::Store => {
                check_n_params(self, &family, &matrices)?;
                self.fit_data_mut().store(family, matrices, weight)?;
                Ok(None)
            }
            FitAction::Return => Ok(Some(matrices)),
        }
    }
}
