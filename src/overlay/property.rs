use super::custom_field::check_structure;
use super::{MetaOverlay, SetterKey};
use crate::core::{MetaError, ObjectKind, Result};
use crate::model::{DocType, DocTypeProperty, FieldProperty, PropertySetter, PropertyValue};
use std::str::FromStr;
use tracing::{Level, event};

fn setter_key(doctype: &str, fieldname: Option<&str>, property: &str) -> SetterKey {
    (
        doctype.to_string(),
        fieldname.unwrap_or_default().to_string(),
        property.to_string(),
    )
}

/// A setter target resolved against the allow-lists.
#[derive(Debug, Clone, Copy)]
enum Property {
    Field(FieldProperty),
    DocType(DocTypeProperty),
}

impl Property {
    /// Unknown names are refused; aliases resolve to one canonical spelling,
    /// so `required` and `reqd` share a setter slot.
    fn resolve(doctype: &str, fieldname: Option<&str>, name: &str) -> Result<Self> {
        let resolved = match fieldname {
            Some(_) => FieldProperty::from_str(name).map(Self::Field),
            None => DocTypeProperty::from_str(name).map(Self::DocType),
        };
        resolved.map_err(|_| MetaError::PropertyNotSupported {
            target: match fieldname {
                Some(f) => format!("{}.{}", doctype, f),
                None => doctype.to_string(),
            },
            property: name.to_string(),
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Field(p) => p.as_str(),
            Self::DocType(p) => p.as_str(),
        }
    }

    fn check(&self, value: &PropertyValue) -> Result<()> {
        match self {
            Self::Field(p) => p.check(value),
            Self::DocType(p) => p.check(value),
        }
    }
}

impl MetaOverlay {
    /// Upserts the setter for `(doctype, fieldname, property)`.
    ///
    /// Only allow-listed properties are accepted; the value is checked
    /// against the property's shape before it is stored. Setters on custom
    /// fields held here must also leave the field valid; use
    /// [`MetaOverlay::set_property_on`] to check base fields as well.
    pub fn set_property(
        &self,
        doctype: &str,
        fieldname: Option<&str>,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<PropertySetter> {
        self.store_property(&DocType::new(doctype, ""), fieldname, property, value.into())
    }

    /// Upserts a setter for `base`, refusing values that would leave the
    /// targeted field invalid once applied to its effective shape.
    pub fn set_property_on(
        &self,
        base: &DocType,
        fieldname: Option<&str>,
        property: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<PropertySetter> {
        self.store_property(base, fieldname, property, value.into())
    }

    fn store_property(
        &self,
        base: &DocType,
        fieldname: Option<&str>,
        property: &str,
        value: PropertyValue,
    ) -> Result<PropertySetter> {
        let doctype = base.name.as_str();
        let resolved = Property::resolve(doctype, fieldname, property)?;
        resolved.check(&value)?;
        if let (Property::Field(field_property), Some(fieldname)) = (resolved, fieldname) {
            self.check_field_effect(base, fieldname, field_property, &value)?;
        }
        let property = resolved.as_str();

        let setter = PropertySetter {
            doctype: doctype.to_string(),
            fieldname: fieldname.map(str::to_string),
            property: property.to_string(),
            value,
        };
        self.property_setters
            .write()?
            .insert(setter_key(doctype, fieldname, property), setter.clone());

        event!(
            Level::INFO,
            doctype = %doctype,
            fieldname = fieldname.unwrap_or(""),
            property = %property,
            "property setter saved"
        );
        self.listeners.notify(doctype);
        Ok(setter)
    }

    fn check_field_effect(
        &self,
        base: &DocType,
        fieldname: &str,
        property: FieldProperty,
        value: &PropertyValue,
    ) -> Result<()> {
        let effective = self.effective(base)?;
        let Some(field) = effective.field(fieldname) else {
            return Ok(());
        };
        let mut updated = field.clone();
        property.apply(&mut updated, value)?;
        check_structure(&updated)
    }

    /// All setters of `doctype`, DocType-level ones first.
    pub fn get_properties(&self, doctype: &str) -> Result<Vec<PropertySetter>> {
        Ok(self
            .property_setters
            .read()?
            .iter()
            .filter(|((dt, _, _), _)| dt == doctype)
            .map(|(_, setter)| setter.clone())
            .collect())
    }

    /// Removes one setter, or every setter of the field (or DocType) when
    /// `property` is `None`. Returns how many were removed.
    pub fn remove_property(
        &self,
        doctype: &str,
        fieldname: Option<&str>,
        property: Option<&str>,
    ) -> Result<usize> {
        let field_key = fieldname.unwrap_or_default();
        let property = match property {
            Some(p) => Some(
                Property::resolve(doctype, fieldname, p)
                    .map(|r| r.as_str())
                    .unwrap_or(p),
            ),
            None => None,
        };

        let removed = {
            let mut guard = self.property_setters.write()?;
            let before = guard.len();
            guard.retain(|(dt, f, p), _| {
                !(dt == doctype && f == field_key && property.is_none_or(|wanted| p == wanted))
            });
            before - guard.len()
        };

        if removed == 0 {
            let mut name = doctype.to_string();
            if let Some(f) = fieldname {
                name.push('.');
                name.push_str(f);
            }
            if let Some(p) = property {
                name.push(':');
                name.push_str(p);
            }
            return Err(MetaError::not_found(ObjectKind::PropertySetter, name));
        }

        event!(Level::INFO, doctype = %doctype, removed, "property setters removed");
        self.listeners.notify(doctype);
        Ok(removed)
    }

    /// Overlays every matching setter onto a copy of `doctype`.
    ///
    /// Setters for fields the DocType does not have are skipped. Applying
    /// twice gives the same result as applying once.
    pub fn apply_properties(&self, doctype: &DocType) -> Result<DocType> {
        let setters = self.get_properties(&doctype.name)?;
        let mut out = doctype.clone();

        for setter in &setters {
            match setter.fieldname.as_deref() {
                None => {
                    if let Ok(property) = DocTypeProperty::from_str(&setter.property) {
                        property.apply(&mut out, &setter.value)?;
                    }
                }
                Some(fieldname) => {
                    let Ok(property) = FieldProperty::from_str(&setter.property) else {
                        continue;
                    };
                    let mut applied = false;
                    if let Some(field) = out.field_mut(fieldname) {
                        property.apply(field, &setter.value)?;
                        applied = true;
                    }
                    if let Some(custom) = out
                        .custom_fields
                        .iter_mut()
                        .find(|c| c.field.fieldname == fieldname)
                    {
                        property.apply(&mut custom.field, &setter.value)?;
                    }
                    if !applied {
                        event!(
                            Level::DEBUG,
                            doctype = %doctype.name,
                            fieldname = %fieldname,
                            property = %setter.property,
                            "property setter targets a missing field"
                        );
                    }
                }
            }
        }
        Ok(out)
    }
}
