use serde::{de, Deserialize, Deserializer, Serialize};
use std::{borrow::Cow, fmt};

/// Identity of an access point type. The set is open: carriers append their
/// own types next to the well known ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ApnType(Cow<'static, str>);

impl ApnType {
    pub const DEFAULT: Self = Self::from_static("default");
    pub const MMS: Self = Self::from_static("mms");
    pub const SUPL: Self = Self::from_static("supl");
    pub const DUN: Self = Self::from_static("dun");
    pub const HIPRI: Self = Self::from_static("hipri");
    pub const IMS: Self = Self::from_static("ims");
    pub const FOTA: Self = Self::from_static("fota");
    pub const CBS: Self = Self::from_static("cbs");
    pub const IA: Self = Self::from_static("ia");
    pub const EMERGENCY: Self = Self::from_static("emergency");
    pub const DM: Self = Self::from_static("dm");
    pub const WAP: Self = Self::from_static("wap");
    pub const NET: Self = Self::from_static("net");
    pub const CMMAIL: Self = Self::from_static("cmmail");
    pub const RCSE: Self = Self::from_static("rcse");
    pub const XCAP: Self = Self::from_static("xcap");
    pub const RCS: Self = Self::from_static("rcs");

    /// Built in types in legacy id order.
    pub const BUILTIN: [Self; 17] = [
        Self::DEFAULT,
        Self::MMS,
        Self::SUPL,
        Self::DUN,
        Self::HIPRI,
        Self::IMS,
        Self::FOTA,
        Self::CBS,
        Self::IA,
        Self::EMERGENCY,
        Self::DM,
        Self::WAP,
        Self::NET,
        Self::CMMAIL,
        Self::RCSE,
        Self::XCAP,
        Self::RCS,
    ];

    /// Profile type entry that matches every type but `ia`.
    pub const WILDCARD: &'static str = "*";

    const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new<T: AsRef<str>>(name: T) -> Self {
        let name = name.as_ref().trim().to_ascii_lowercase();
        match Self::BUILTIN.iter().find(|t| t.0 == name.as_str()) {
            Some(builtin) => builtin.clone(),
            None => Self(Cow::Owned(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_emergency(&self) -> bool {
        *self == Self::EMERGENCY
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == Self::WILDCARD
    }
}

impl fmt::Display for ApnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ApnType {
    fn deserialize<D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(d)?;
        if name.trim().is_empty() {
            return Err(de::Error::custom("empty apn type"));
        }
        Ok(Self::new(name))
    }
}

/// Registered apn types with their numeric ids. Built in types keep their
/// legacy ids, extensions are appended in registration order.
#[derive(Debug, Clone)]
pub struct ApnTypeRegistry {
    types: Vec<ApnType>,
}

impl Default for ApnTypeRegistry {
    fn default() -> Self {
        Self {
            types: ApnType::BUILTIN.to_vec(),
        }
    }
}

impl ApnTypeRegistry {
    /// Registers the given type if needed and returns its id.
    pub fn register(&mut self, apn_type: &ApnType) -> u32 {
        if let Some(id) = self.id(apn_type) {
            return id;
        }
        self.types.push(apn_type.clone());
        (self.types.len() - 1) as u32
    }

    pub fn id(&self, apn_type: &ApnType) -> Option<u32> {
        self.types
            .iter()
            .position(|t| t == apn_type)
            .map(|id| id as u32)
    }

    pub fn contains(&self, apn_type: &ApnType) -> bool {
        self.id(apn_type).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApnType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A configured access point. Profiles are tried in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnProfile {
    /// The access point name handed to the modem
    pub name: String,
    /// The apn types this profile serves
    pub types: Vec<ApnType>,
    /// Whether the profile may be used while roaming with data roaming off
    #[serde(default)]
    pub roaming_allowed: bool,
    #[serde(default)]
    pub carrier: Option<String>,
}

impl ApnProfile {
    pub fn new<T: Into<String>>(name: T, types: &[ApnType]) -> Self {
        Self {
            name: name.into(),
            types: types.to_vec(),
            roaming_allowed: false,
            carrier: None,
        }
    }

    pub fn can_handle(&self, apn_type: &ApnType) -> bool {
        self.types
            .iter()
            .any(|t| t == apn_type || (t.is_wildcard() && *apn_type != ApnType::IA))
    }
}

impl fmt::Display for ApnProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(carrier) = &self.carrier {
            write!(f, " ({carrier})")?;
        }
        Ok(())
    }
}

/// Registers every concrete type named by the given profiles.
pub fn register_profile_types(registry: &mut ApnTypeRegistry, profiles: &[ApnProfile]) {
    profiles
        .iter()
        .flat_map(|profile| profile.types.iter())
        .filter(|t| !t.is_wildcard())
        .for_each(|t| {
            registry.register(t);
        });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn legacy_ids() {
        let registry = ApnTypeRegistry::default();
        assert_eq!(Some(0), registry.id(&ApnType::DEFAULT));
        assert_eq!(Some(5), registry.id(&ApnType::IMS));
        assert_eq!(Some(9), registry.id(&ApnType::EMERGENCY));
        assert_eq!(Some(16), registry.id(&ApnType::RCS));
        assert_eq!(17, registry.len());
    }

    #[test]
    fn carrier_extension() {
        let mut registry = ApnTypeRegistry::default();
        let vsim = ApnType::new("VSIM");
        assert!(!registry.contains(&vsim));
        assert_eq!(17, registry.register(&vsim));
        assert_eq!(17, registry.register(&ApnType::new("vsim")));
        assert_eq!(Some(17), registry.id(&vsim));
        assert_eq!(1, registry.register(&ApnType::new("MMS")));
    }

    #[test]
    fn wildcard_profile() {
        let profile = ApnProfile::new("internet", &[ApnType::new(ApnType::WILDCARD)]);
        assert!(profile.can_handle(&ApnType::DEFAULT));
        assert!(profile.can_handle(&ApnType::new("vsim")));
        assert!(!profile.can_handle(&ApnType::IA));

        let mut registry = ApnTypeRegistry::default();
        register_profile_types(&mut registry, &[profile]);
        assert_eq!(17, registry.len());
    }

    #[test]
    fn deserialize_normalizes() {
        let profile: ApnProfile =
            serde_json::from_str(r#"{"name": "ims", "types": ["IMS", " xcap "]}"#)
                .expect("profile");
        assert_eq!(vec![ApnType::IMS, ApnType::XCAP], profile.types);
        assert!(!profile.roaming_allowed);
        assert!(serde_json::from_str::<ApnType>(r#""""#).is_err());
    }
}
