//! Method bodies: a flow graph plus the signature it implements.

use std::fmt;

use crate::{
    ir::{FlowGraph, MethodDef, Type},
    Result,
};

/// A named, typed parameter or return slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: String,
    parameter_type: Type,
}

impl Parameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, parameter_type: Type) -> Self {
        Self {
            name: name.into(),
            parameter_type,
        }
    }

    /// The parameter's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameter's type.
    #[must_use]
    pub fn parameter_type(&self) -> &Type {
        &self.parameter_type
    }
}

/// The implementation of a method.
///
/// The entry block of [`MethodBody::implementation`] takes exactly one parameter per entry
/// of [`MethodBody::parameters`], in order; for instance methods the first one is `this`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    return_parameter: Parameter,
    parameters: Vec<Parameter>,
    implementation: FlowGraph,
}

impl MethodBody {
    /// Creates a body.
    #[must_use]
    pub fn new(
        return_parameter: Parameter,
        parameters: Vec<Parameter>,
        implementation: FlowGraph,
    ) -> Self {
        Self {
            return_parameter,
            parameters,
            implementation,
        }
    }

    /// Creates a body whose signature is taken from `method`.
    #[must_use]
    pub fn for_method(method: &MethodDef, implementation: FlowGraph) -> Self {
        let parameters = method
            .this_type()
            .map(|this| Parameter::new("this", this))
            .into_iter()
            .chain(
                method
                    .parameters()
                    .iter()
                    .enumerate()
                    .map(|(index, ty)| Parameter::new(format!("arg{index}"), ty.clone())),
            )
            .collect();
        Self::new(
            Parameter::new("return", method.return_type().clone()),
            parameters,
            implementation,
        )
    }

    /// The return slot.
    #[must_use]
    pub fn return_parameter(&self) -> &Parameter {
        &self.return_parameter
    }

    /// The return type.
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.return_parameter.parameter_type
    }

    /// The method's parameters, `this` first for instance methods.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// The flow graph implementing the method.
    #[must_use]
    pub fn implementation(&self) -> &FlowGraph {
        &self.implementation
    }

    /// Returns a body with the same signature and a new implementation.
    #[must_use]
    pub fn with_implementation(&self, implementation: FlowGraph) -> Self {
        Self {
            return_parameter: self.return_parameter.clone(),
            parameters: self.parameters.clone(),
            implementation,
        }
    }

    /// Validates the implementation and checks that the entry block matches the signature.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the graph is malformed or its entry block's
    /// parameters disagree with [`MethodBody::parameters`].
    pub fn validate(&self) -> Result<()> {
        self.implementation.validate()?;
        let graph = &self.implementation;
        let Some(entry) = graph.block(graph.entry_point()) else {
            return Err(malformed_error!("entry block is missing"));
        };
        if entry.parameters().len() != self.parameters.len() {
            return Err(malformed_error!(
                "entry block takes {} parameters but the signature has {}",
                entry.parameters().len(),
                self.parameters.len()
            ));
        }
        for (bound, declared) in entry.parameters().iter().zip(&self.parameters) {
            if bound.parameter_type() != declared.parameter_type() {
                return Err(malformed_error!(
                    "entry parameter {} has type {} but {} is declared as {}",
                    bound.tag(),
                    bound.parameter_type(),
                    declared.name(),
                    declared.parameter_type()
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parameters: Vec<String> = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.parameter_type))
            .collect();
        writeln!(f, "({}) -> {}", parameters.join(", "), self.return_type())?;
        write!(f, "{}", self.implementation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockFlow, FlowGraphBuilder, IntegerSpec};

    #[test]
    fn test_validate_checks_signature() {
        let int = Type::Int(IntegerSpec::I32);
        let mut builder = FlowGraphBuilder::new();
        let entry = builder.entry_point().clone();
        let x = builder.append_parameter(&entry, int.clone(), "x");
        builder.set_flow(&entry, BlockFlow::return_value(int.clone(), x));
        let graph = builder.to_immutable();

        let good = MethodBody::new(
            Parameter::new("return", int.clone()),
            vec![Parameter::new("x", int.clone())],
            graph.clone(),
        );
        assert!(good.validate().is_ok());

        let bad = MethodBody::new(Parameter::new("return", int), Vec::new(), graph);
        assert!(bad.validate().is_err());
    }
}
