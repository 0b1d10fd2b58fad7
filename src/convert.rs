//! Converters between source values and the caller's output type.
//!
//! Fetched and locally stored values share a source type; the caller sees
//! an output type. [`ConverterRegistry`] resolves which converter applies,
//! keyed by the source value's type tag (`std::any::type_name`):
//!
//! 1. the configured [`ConverterFactory`], when one is set;
//! 2. otherwise the statically registered converter for the tag;
//! 3. otherwise an identity cast, valid only when source and output types
//!    coincide — anything else is a
//!    [`NoConverter`](crate::DataboxError::NoConverter) error.
//!
//! A converter that runs and yields `None` is a
//! [`Conversion`](crate::DataboxError::Conversion) error, not a silent
//! drop: "no converter" and "converter produced nothing" stay
//! distinguishable to the caller.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{DataboxError, Result};

/// Pure mapping from a source-typed value to the output type.
///
/// Return `None` to signal that the input could not be represented as an
/// output value; the registry turns that into a fatal
/// [`Conversion`](crate::DataboxError::Conversion) error for the emission.
///
/// Implemented for plain closures:
///
/// ```rust
/// # use databox::Converter;
/// let upper = |s: String| Some(s.to_uppercase());
/// assert_eq!(upper.convert("hi".to_owned()), Some("HI".to_owned()));
/// ```
pub trait Converter<I, O>: Send + Sync {
    /// Convert one value.
    fn convert(&self, input: I) -> Option<O>;
}

impl<I, O, F> Converter<I, O> for F
where
    F: Fn(I) -> Option<O> + Send + Sync,
{
    fn convert(&self, input: I) -> Option<O> {
        self(input)
    }
}

/// Type-erased converter closure, keyed by a source type tag.
pub type ErasedConverter<O> = Arc<dyn Fn(Box<dyn Any + Send>) -> Result<O> + Send + Sync>;

/// Resolves converters by runtime type tag, taking precedence over the
/// registry's static map when configured.
pub trait ConverterFactory<O>: Send + Sync {
    /// A converter for values tagged `type_tag`, or `None` to fall back
    /// to the identity path.
    fn converter_for(&self, type_tag: &str) -> Option<ErasedConverter<O>>;
}

/// Erase a typed converter into the registry's closure form.
///
/// Factories use this to hand back converters for the tags they recognise.
pub fn erase_converter<I, O, C>(converter: C) -> ErasedConverter<O>
where
    I: Send + 'static,
    O: 'static,
    C: Converter<I, O> + 'static,
{
    Arc::new(move |boxed: Box<dyn Any + Send>| {
        let tag = type_name::<I>();
        let input = boxed.downcast::<I>().map_err(|_| DataboxError::NoConverter {
            from: tag,
            to: type_name::<O>(),
        })?;
        converter
            .convert(*input)
            .ok_or(DataboxError::Conversion { type_tag: tag })
    })
}

/// Registry mapping source type tags to converters, with an optional
/// factory override and an identity-cast last resort.
pub struct ConverterRegistry<O> {
    converters: HashMap<&'static str, ErasedConverter<O>>,
    factory: Option<Arc<dyn ConverterFactory<O>>>,
}

impl<O: Send + 'static> ConverterRegistry<O> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
            factory: None,
        }
    }

    /// Register a converter for source type `I`. Replaces any previous
    /// converter for the same type.
    pub fn add<I, C>(&mut self, converter: C)
    where
        I: Send + 'static,
        C: Converter<I, O> + 'static,
    {
        self.converters
            .insert(type_name::<I>(), erase_converter(converter));
    }

    /// Install a factory consulted before the static map.
    pub fn set_factory(&mut self, factory: Arc<dyn ConverterFactory<O>>) {
        self.factory = Some(factory);
    }

    /// Whether neither converters nor a factory are registered.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty() && self.factory.is_none()
    }

    /// Convert `value` to the output type per the resolution order.
    pub fn resolve<I: Send + 'static>(&self, value: I) -> Result<O> {
        let tag = type_name::<I>();

        let candidate = match &self.factory {
            Some(factory) => factory.converter_for(tag),
            None => self.converters.get(tag).cloned(),
        };

        match candidate {
            Some(converter) => converter(Box::new(value)),
            None => {
                // Identity: source and output types may coincide, in which
                // case no converter is needed.
                let boxed: Box<dyn Any> = Box::new(value);
                boxed
                    .downcast::<O>()
                    .map(|output| *output)
                    .map_err(|_| DataboxError::NoConverter {
                        from: tag,
                        to: type_name::<O>(),
                    })
            }
        }
    }
}

impl<O: Send + 'static> Default for ConverterRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}
