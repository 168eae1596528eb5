#![allow(unsafe_op_in_unsafe_fn)]

use std::path::PathBuf;

use numpy::{IxDyn, PyArrayDyn, PyArrayMethods, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::Error;
use crate::{
    AnalysisStyle, CompileOptions, LocalSearch, Metric, Model, OptimizeOptions, SensitivityOptions, Target, Variant,
    VizType,
};

impl From<Error> for PyErr {
    fn from(err: Error) -> Self {
        PyValueError::new_err(err.to_string())
    }
}

fn to_ndarray(py: Python<'_>, dims: &[usize], data: &[f64]) -> PyResult<Py<PyAny>> {
    let array = unsafe { PyArrayDyn::<f64>::new(py, IxDyn(dims), false) };
    unsafe {
        array
            .as_slice_mut()
            .map_err(|_| PyValueError::new_err("failed to export data"))?
            .copy_from_slice(data);
    }
    Ok(array.into_any().unbind())
}

fn read_values(array: Option<PyReadonlyArray1<'_, f64>>, expected: usize, name: &str) -> PyResult<Option<Vec<f64>>> {
    let Some(array) = array else {
        return Ok(None);
    };
    let data = array
        .as_slice()
        .map_err(|_| PyValueError::new_err(format!("{name} must be contiguous")))?;
    if data.len() != expected {
        return Err(PyValueError::new_err(format!(
            "{name} has {} entries, the model has {expected}",
            data.len()
        )));
    }
    Ok(Some(data.to_vec()))
}

/// A compiled model bound to its directory.
#[pyclass(name = "Model", frozen)]
struct PyModel {
    inner: Model,
}

#[pymethods]
impl PyModel {
    #[getter]
    fn path(&self) -> PathBuf {
        self.inner.path().to_path_buf()
    }

    #[getter]
    fn parameters(&self) -> Vec<String> {
        self.inner.parameters().names().to_vec()
    }

    #[getter]
    fn species(&self) -> Vec<String> {
        self.inner.species().names().to_vec()
    }

    #[getter]
    fn observables(&self) -> Vec<String> {
        self.inner.observables().into_iter().map(str::to_string).collect()
    }

    #[getter]
    fn conditions(&self) -> Vec<String> {
        self.inner.conditions().into_iter().map(str::to_string).collect()
    }

    fn pval(&self) -> Vec<f64> {
        self.inner.pval()
    }

    fn ival(&self) -> Vec<f64> {
        self.inner.ival()
    }

    fn summary(&self) -> String {
        self.inner.summary()
    }

    /// Raw `[observable, time, condition]` trajectories; defaults are used
    /// for omitted `x` or `y0`.
    #[pyo3(signature = (x = None, y0 = None))]
    fn simulate(
        &self,
        py: Python<'_>,
        x: Option<PyReadonlyArray1<'_, f64>>,
        y0: Option<PyReadonlyArray1<'_, f64>>,
    ) -> PyResult<Py<PyAny>> {
        let model = &self.inner;
        let x = read_values(x, model.parameters().len(), "x")?.unwrap_or_else(|| model.pval());
        let y0 = read_values(y0, model.species().len(), "y0")?.unwrap_or_else(|| model.ival());
        let traj = py.detach(|| model.simulate(&x, &y0, None).map_err(Error::from))?;
        to_ndarray(py, &traj.shape(), traj.as_slice())
    }
}

#[pyfunction(signature = (path, similarity_threshold = 0.7))]
fn create_model(path: PathBuf, similarity_threshold: f64) -> PyResult<PyModel> {
    let options = CompileOptions {
        similarity_threshold,
    };
    Ok(PyModel {
        inner: Model::load(path, &options)?,
    })
}

/// Runs the genetic algorithm for each run id and returns
/// `(run_id, best_fitness)` pairs.
#[pyfunction(signature = (
    model,
    run_ids,
    popsize = 5,
    max_generation = 10_000,
    allowable_error = 0.0,
    local_search = "mutation",
    variant = "v2",
    n_children = 50,
    overwrite = false,
    seed = None,
    workers = 1,
    n_threads = None,
))]
#[allow(clippy::too_many_arguments)]
fn optimize(
    py: Python<'_>,
    model: &Bound<'_, PyModel>,
    run_ids: Vec<u32>,
    popsize: usize,
    max_generation: u64,
    allowable_error: f64,
    local_search: &str,
    variant: &str,
    n_children: usize,
    overwrite: bool,
    seed: Option<u64>,
    workers: usize,
    n_threads: Option<usize>,
) -> PyResult<Vec<(u32, f64)>> {
    let local_search = match local_search {
        "mutation" => LocalSearch::Mutation,
        "powell" => LocalSearch::Powell,
        "de" => LocalSearch::De,
        other => return Err(PyValueError::new_err(format!("unknown local_search '{other}'"))),
    };
    let variant = match variant {
        "v1" => Variant::V1,
        "v2" => Variant::V2,
        other => return Err(PyValueError::new_err(format!("unknown variant '{other}'"))),
    };
    let options = OptimizeOptions {
        popsize,
        max_generation,
        allowable_error,
        local_search,
        variant,
        n_children,
        overwrite,
        seed,
        workers,
        ..OptimizeOptions::default()
    };
    let model = &model.get().inner;
    let results = py.detach(|| crate::optimize_runs(model, &run_ids, &options, n_threads))?;
    Ok(results.into_iter().map(|r| (r.run_id, r.best_fitness)).collect())
}

/// Writes `simulation_data/simulations_<tag>.json` and returns its path.
#[pyfunction(signature = (model, viz_type = "original"))]
fn run_simulation(py: Python<'_>, model: &Bound<'_, PyModel>, viz_type: &str) -> PyResult<PathBuf> {
    let viz_type: VizType = viz_type.parse()?;
    let model = &model.get().inner;
    Ok(py.detach(|| crate::run_simulation(model, viz_type))?)
}

/// Sensitivity coefficients as a `[run, perturbed, observable, condition]`
/// array.
#[pyfunction(signature = (
    model,
    target = "reaction",
    metric = "maximum",
    style = "barplot",
    excluded_initials = Vec::new(),
    use_cache = true,
))]
fn run_analysis(
    py: Python<'_>,
    model: &Bound<'_, PyModel>,
    target: &str,
    metric: &str,
    style: &str,
    excluded_initials: Vec<String>,
    use_cache: bool,
) -> PyResult<Py<PyAny>> {
    let target = match target {
        "reaction" => Target::Reaction,
        "parameter" => Target::Parameter,
        "initial_condition" | "initial" => Target::Initial,
        other => return Err(PyValueError::new_err(format!("unknown target '{other}'"))),
    };
    let metric = match metric {
        "maximum" => Metric::Maximum,
        "minimum" => Metric::Minimum,
        "integral" => Metric::Integral,
        other => return Err(PyValueError::new_err(format!("unknown metric '{other}'"))),
    };
    let style = match style {
        "barplot" => AnalysisStyle::Barplot,
        "heatmap" => AnalysisStyle::Heatmap,
        other => return Err(PyValueError::new_err(format!("unknown style '{other}'"))),
    };
    let options = SensitivityOptions {
        target,
        metric,
        excluded_initials,
        use_cache,
        ..SensitivityOptions::default()
    };
    let model = &model.get().inner;
    let s = py.detach(|| crate::run_analysis(model, style, &options))?;
    to_ndarray(py, &s.shape(), s.as_slice())
}

#[pymodule]
fn biomass(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyModel>()?;
    module.add_function(wrap_pyfunction!(create_model, module)?)?;
    module.add_function(wrap_pyfunction!(optimize, module)?)?;
    module.add_function(wrap_pyfunction!(run_simulation, module)?)?;
    module.add_function(wrap_pyfunction!(run_analysis, module)?)?;
    Ok(())
}
