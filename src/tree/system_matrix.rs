use crate::error::{FitError, TreeError};
use crate::linalg::invert;
use crate::tree::{CompartmentTree, Indexing};
use crate::types::{FreqMatrices, LEAK};

use ndarray::{Array1, Array2, Array3, Axis, Zip, s};
use num_complex::Complex64;

/// Selection of the terms assembled into a system matrix
#[derive(Clone, Copy, Debug)]
pub struct MatrixOptions<'a> {
    /// Channels whose admittance is included, every instantiated channel and the leak if `None`
    pub channel_names: Option<&'a [&'a str]>,
    /// Include the capacitive term `s * ca`
    pub with_ca: bool,
    /// Include the concentration-mediated terms of every ion pool
    pub use_conc: bool,
    /// Always include the leak, even if `channel_names` misses it
    pub add_leak: bool,
    pub indexing: Indexing,
}

impl<'a> MatrixOptions<'a> {
    pub fn channels(mut self, channel_names: &'a [&'a str]) -> Self {
        self.channel_names = Some(channel_names);
        self
    }

    pub fn with_ca(mut self, with_ca: bool) -> Self {
        self.with_ca = with_ca;
        self
    }

    pub fn use_conc(mut self, use_conc: bool) -> Self {
        self.use_conc = use_conc;
        self
    }

    pub fn add_leak(mut self, add_leak: bool) -> Self {
        self.add_leak = add_leak;
        self
    }

    pub fn indexing(mut self, indexing: Indexing) -> Self {
        self.indexing = indexing;
        self
    }
}

impl Default for MatrixOptions<'_> {
    fn default() -> Self {
        Self {
            channel_names: None,
            with_ca: true,
            use_conc: false,
            add_leak: true,
            indexing: Indexing::Locs,
        }
    }
}

impl CompartmentTree {
    fn matrix_channel_names<'a>(&'a self, options: &MatrixOptions<'a>) -> Vec<&'a str> {
        let mut names = match options.channel_names {
            Some(names) => names.to_vec(),
            None => self.all_channel_names(),
        };
        if options.add_leak && !names.contains(&LEAK) {
            names.insert(0, LEAK);
        }
        names
    }

    /// System (admittance) matrices with shape `(n_freqs, n, n)`
    ///
    /// Every entry is the linearised current response at one node to a voltage perturbation at
    /// another, the sum of the capacitive term, the weighted Laplacian of the coupling
    /// conductances, the channel admittances and optionally the concentration-mediated terms.
    pub fn calc_system_matrix(
        &self,
        freqs: &Array1<Complex64>,
        options: &MatrixOptions,
    ) -> Result<FreqMatrices, TreeError> {
        let names = self.matrix_channel_names(options);
        let n = self.len();
        let mut sys = Array3::<Complex64>::zeros((freqs.len(), n, n));
        for node in self.iter() {
            let i = node.index();
            if options.with_ca {
                Zip::from(sys.slice_mut(s![.., i, i]))
                    .and(freqs)
                    .for_each(|y, &f| *y += f * node.ca);
            }
            if let Some(p) = node.parent() {
                let g_c = Complex64::new(node.g_c, 0.0);
                sys.slice_mut(s![.., i, i]).mapv_inplace(|y| y + g_c);
                sys.slice_mut(s![.., p, p]).mapv_inplace(|y| y + g_c);
                sys.slice_mut(s![.., i, p]).mapv_inplace(|y| y - g_c);
                sys.slice_mut(s![.., p, i]).mapv_inplace(|y| y - g_c);
            }

            let mut diag = sys.slice_mut(s![.., i, i]);
            let terms =
                node.calc_membrane_conductance_terms(freqs, &names, self.channel_storage())?;
            for (name, term) in &terms {
                let g = node.current(name)?.g;
                diag.scaled_add(Complex64::new(g, 0.0), term);
            }
            if options.use_conc {
                for (ion, mech) in &node.concmechs {
                    let term = node.calc_membrane_concentration_terms(
                        ion,
                        &names,
                        freqs,
                        self.channel_storage(),
                    )?;
                    diag.scaled_add(Complex64::new(mech.gamma, 0.0), &term);
                }
            }
        }
        self.permute_from_tree(sys, options.indexing)
    }

    /// Real steady-state conductance matrix of every current without capacitance
    pub fn calc_conductance_matrix(&self, indexing: Indexing) -> Result<Array2<f64>, TreeError> {
        let n = self.len();
        let mut g_mat = Array2::<f64>::zeros((n, n));
        for node in self.iter() {
            let i = node.index();
            g_mat[[i, i]] += node.g_tot(self.channel_storage(), None, None, None)?;
            if let Some(p) = node.parent() {
                g_mat[[i, i]] += node.g_c;
                g_mat[[p, p]] += node.g_c;
                g_mat[[i, p]] -= node.g_c;
                g_mat[[p, i]] -= node.g_c;
            }
        }
        self.permute_from_tree(g_mat, indexing)
    }

    /// Impedance matrices, the inverses of [CompartmentTree::calc_system_matrix]
    pub fn calc_impedance_matrix(
        &self,
        freqs: &Array1<Complex64>,
        options: &MatrixOptions,
    ) -> Result<FreqMatrices, FitError> {
        let mut sys = self.calc_system_matrix(freqs, options)?;
        for mut slice in sys.axis_iter_mut(Axis(0)) {
            let inv = invert(slice.view())?;
            slice.assign(&inv);
        }
        Ok(sys)
    }

    /// Passive system matrix of leak and coupling only, in tree indexing
    pub(crate) fn passive_conductance_matrix(&self) -> Result<Array2<f64>, TreeError> {
        let zero = Array1::from_elem(1, Complex64::new(0.0, 0.0));
        let sys = self.calc_system_matrix(
            &zero,
            &MatrixOptions::default()
                .channels(&[LEAK])
                .with_ca(false)
                .indexing(Indexing::Tree),
        )?;
        Ok(sys.index_axis(Axis(0), 0).mapv(|y| y.re))
    }
}
