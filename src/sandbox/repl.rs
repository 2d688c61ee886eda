//! The embedded-CPython REPL a sandbox child runs code against.
//!
//! One [`SandboxRepl`] owns one persistent `globals` dict for the
//! lifetime of a query. `context`, `llm_query`, `llm_query_batched`,
//! `FINAL`, and `FINAL_VAR` are (re)bound into it; user code executed
//! via [`SandboxRepl::exec`] sees whatever the previous `exec` left
//! behind, per the namespace-survives-across-execs invariant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pyo3::exceptions::PyBaseException;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use pyo3::{create_exception, intern};

use crate::core::capture::{CaptureRecord, CapturedException};
use crate::error::SandboxError;
use crate::wire::message::{SubCallItem, SubCallRequest, SubCallResponse, SubCallResult};

create_exception!(shesha_sandbox, FinalAnswerSignal, PyBaseException);

/// Blocking bridge from a Python callback (running on a blocking
/// thread) back to the async Executor connection. Implementations
/// perform the nested `subcall_request`/`subcall_response` frame
/// round-trip described in the wire contract and block the calling
/// thread until the answer arrives.
pub trait SubcallSink: Send + Sync {
    /// Services one batch of sub-LLM calls synchronously from the
    /// calling (blocking) thread's perspective.
    fn call(&self, request: SubCallRequest) -> SubCallResponse;
}

/// The outcome of executing one code block: its capture record, plus a
/// resolved final answer if `FINAL`/`FINAL_VAR` was invoked.
pub struct ExecOutcome {
    /// Verbatim code, captured stdout, and any raised exception.
    pub capture: CaptureRecord,
    /// Set when the code block called `FINAL(...)` or `FINAL_VAR(...)`.
    pub final_answer: Option<String>,
}

/// Owns the persistent Python namespace for one query.
pub struct SandboxRepl {
    sink: Arc<dyn SubcallSink>,
    globals: Mutex<Py<PyDict>>,
    max_output_chars: usize,
    final_slot: Arc<Mutex<Option<String>>>,
}

impl SandboxRepl {
    /// Initializes the embedded interpreter and binds a fresh API
    /// surface (but no `context` yet — that arrives via `load_documents`).
    pub fn new(sink: Arc<dyn SubcallSink>, max_output_chars: usize) -> Result<Self, SandboxError> {
        pyo3::prepare_freethreaded_python();
        let final_slot = Arc::new(Mutex::new(None));

        let globals = Python::with_gil(|py| -> PyResult<Py<PyDict>> {
            let globals = PyDict::new(py);
            let globals_handle: Py<PyDict> = globals.clone().unbind();
            bind_api_surface(py, &globals, &sink, &final_slot, globals_handle)?;
            Ok(globals.unbind())
        })
        .map_err(|e| SandboxError::Framing(format!("interpreter init failed: {e}")))?;

        Ok(Self {
            sink,
            globals: Mutex::new(globals),
            max_output_chars,
            final_slot,
        })
    }

    /// Binds `context` to the given ordered document contents.
    pub fn load_documents(&self, docs: &[String]) -> Result<usize, SandboxError> {
        let globals = self.globals.lock().expect("globals mutex poisoned");
        Python::with_gil(|py| -> PyResult<usize> {
            let globals = globals.bind(py);
            let list = PyList::new(py, docs)?;
            globals.set_item(intern!(py, "context"), list)?;
            Ok(docs.len())
        })
        .map_err(|e| SandboxError::Framing(format!("load_documents failed: {e}")))
    }

    /// Executes one code block, capturing stdout and any exception, and
    /// reports a resolved final answer if `FINAL`/`FINAL_VAR` fired.
    ///
    /// `timeout` bounds the exec at the Executor, not here: the runner
    /// has no portable way to preempt a running interpreter, so the
    /// Executor enforces the wall-clock ceiling by killing the child.
    pub fn exec(&self, code: &str, _timeout: Duration) -> Result<ExecOutcome, SandboxError> {
        *self.final_slot.lock().expect("final_slot mutex poisoned") = None;

        let globals = self.globals.lock().expect("globals mutex poisoned");
        let (output, exception) = Python::with_gil(|py| -> PyResult<(String, Option<CapturedException>)> {
            let globals = globals.bind(py);
            let io = py.import(intern!(py, "io"))?;
            let sys = py.import(intern!(py, "sys"))?;
            let buffer = io.call_method0(intern!(py, "StringIO"))?;
            let real_stdout = sys.getattr(intern!(py, "stdout"))?;
            sys.setattr(intern!(py, "stdout"), &buffer)?;

            let result = py.run(std::ffi::CString::new(code).unwrap_or_default().as_c_str(), Some(globals), None);

            sys.setattr(intern!(py, "stdout"), real_stdout)?;
            let captured: String = buffer.call_method0(intern!(py, "getvalue"))?.extract()?;

            let exception = match result {
                Ok(()) => None,
                Err(err) if err.is_instance_of::<FinalAnswerSignal>(py) => None,
                Err(err) => Some(describe_exception(py, &err)),
            };

            Ok((captured, exception))
        })
        .map_err(|e| SandboxError::Framing(format!("exec failed: {e}")))?;

        let untruncated_len = output.chars().count();
        let truncated = untruncated_len > self.max_output_chars;
        let display_output = if truncated {
            let head: String = output.chars().take(self.max_output_chars).collect();
            format!(
                "{head}\n[Output truncated to {} of {untruncated_len} characters. \
                 Use llm_query() to analyze content you cannot see.]",
                self.max_output_chars
            )
        } else {
            output
        };

        let final_answer = self.final_slot.lock().expect("final_slot mutex poisoned").take();

        Ok(ExecOutcome {
            capture: CaptureRecord {
                code: code.to_string(),
                output: display_output,
                exception,
                truncated,
                untruncated_len,
                final_answer: final_answer.clone(),
            },
            final_answer,
        })
    }

    /// Looks up an identifier's string representation in the namespace,
    /// for the bare-`FINAL(identifier)` fallback resolution path.
    pub fn resolve_identifier(&self, identifier: &str) -> Option<String> {
        let globals = self.globals.lock().expect("globals mutex poisoned");
        Python::with_gil(|py| {
            let globals = globals.bind(py);
            globals
                .get_item(identifier)
                .ok()
                .flatten()
                .and_then(|value| value.str().ok())
                .map(|s| s.to_string())
        })
    }

    /// Clears user bindings and rebinds a fresh API surface, keeping
    /// builtins. Documents must be reloaded via `load_documents` after
    /// a reset; callers rely on `load_documents` alone restoring full
    /// function after a `reset`.
    pub fn reset(&self) -> Result<(), SandboxError> {
        let mut globals = self.globals.lock().expect("globals mutex poisoned");
        let fresh = Python::with_gil(|py| -> PyResult<Py<PyDict>> {
            let fresh = PyDict::new(py);
            let fresh_handle: Py<PyDict> = fresh.clone().unbind();
            bind_api_surface(py, &fresh, &self.sink, &self.final_slot, fresh_handle)?;
            Ok(fresh.unbind())
        })
        .map_err(|e| SandboxError::Framing(format!("reset failed: {e}")))?;
        *globals = fresh;
        Ok(())
    }
}

fn bind_api_surface(
    py: Python<'_>,
    globals: &Bound<'_, PyDict>,
    sink: &Arc<dyn SubcallSink>,
    final_slot: &Arc<Mutex<Option<String>>>,
    globals_handle: Py<PyDict>,
) -> PyResult<()> {
    globals.set_item(intern!(py, "__builtins__"), py.import(intern!(py, "builtins"))?)?;

    let sink_for_query = Arc::clone(sink);
    let query_fn = pyo3::types::PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, pyo3::types::PyTuple>, _kwargs| -> PyResult<String> {
            let (instruction, content): (String, Option<String>) = match args.len() {
                1 => (args.get_item(0)?.extract()?, None),
                2 => (args.get_item(0)?.extract()?, Some(args.get_item(1)?.extract()?)),
                n => {
                    return Err(pyo3::exceptions::PyTypeError::new_err(format!(
                        "llm_query() takes 1 or 2 arguments, got {n}"
                    )));
                }
            };
            let request = SubCallRequest {
                calls: vec![SubCallItem {
                    instruction,
                    content,
                    model_override: None,
                }],
            };
            respond_single(&sink_for_query.call(request))
        },
    )?;
    globals.set_item(intern!(py, "llm_query"), query_fn)?;

    let sink_for_batch = Arc::clone(sink);
    let batched_fn = pyo3::types::PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, pyo3::types::PyTuple>, _kwargs| -> PyResult<Vec<String>> {
            let prompts: Vec<String> = args.get_item(0)?.extract()?;
            let request = SubCallRequest {
                calls: prompts
                    .into_iter()
                    .map(|instruction| SubCallItem {
                        instruction,
                        content: None,
                        model_override: None,
                    })
                    .collect(),
            };
            let response = sink_for_batch.call(request);
            response
                .results
                .into_iter()
                .map(|r| match r {
                    SubCallResult::Text { text } => Ok(text),
                    SubCallResult::SizeExceeded { message } => {
                        Err(pyo3::exceptions::PyValueError::new_err(message))
                    }
                })
                .collect()
        },
    )?;
    globals.set_item(intern!(py, "llm_query_batched"), batched_fn)?;

    let slot_for_final = Arc::clone(final_slot);
    let final_fn = pyo3::types::PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, pyo3::types::PyTuple>, _kwargs| -> PyResult<()> {
            let value: String = args.get_item(0)?.str()?.to_string();
            *slot_for_final.lock().expect("final_slot mutex poisoned") = Some(value);
            Err(PyErr::new::<FinalAnswerSignal, _>("FINAL"))
        },
    )?;
    globals.set_item(intern!(py, "FINAL"), final_fn)?;

    let slot_for_final_var = Arc::clone(final_slot);
    let final_var_fn = pyo3::types::PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, pyo3::types::PyTuple>, _kwargs| -> PyResult<()> {
            let name: String = args.get_item(0)?.extract()?;
            let py = args.py();
            let globals = globals_handle.bind(py);
            let value = globals
                .get_item(&name)?
                .ok_or_else(|| pyo3::exceptions::PyNameError::new_err(format!("name '{name}' is not defined")))?
                .str()?
                .to_string();
            *slot_for_final_var.lock().expect("final_slot mutex poisoned") = Some(value);
            Err(PyErr::new::<FinalAnswerSignal, _>("FINAL_VAR"))
        },
    )?;
    globals.set_item(intern!(py, "FINAL_VAR"), final_var_fn)?;

    Ok(())
}

fn respond_single(response: &SubCallResponse) -> PyResult<String> {
    match response.results.first() {
        Some(SubCallResult::Text { text }) => Ok(text.clone()),
        Some(SubCallResult::SizeExceeded { message }) => {
            Err(pyo3::exceptions::PyValueError::new_err(message.clone()))
        }
        None => Err(pyo3::exceptions::PyRuntimeError::new_err(
            "sub-LLM gateway returned no result",
        )),
    }
}

fn describe_exception(py: Python<'_>, err: &PyErr) -> CapturedException {
    let exception_type = err
        .get_type(py)
        .name()
        .map_or_else(|_| "Exception".to_string(), |n| n.to_string());
    let message = err.value(py).to_string();
    let traceback = err
        .traceback(py)
        .and_then(|tb| tb.format().ok())
        .unwrap_or_default();
    CapturedException {
        exception_type,
        message,
        traceback,
    }
}
