use ndarray::{ArrayD, Zip};

use crate::{Result, SwarmErr};

/// A named tensor of trainable values.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    value: ArrayD<f32>,
}

impl Param {
    /// Creates a new `Param`.
    ///
    /// # Arguments
    /// * `name` - The name of the parameter inside its group.
    /// * `value` - The tensor holding the parameter's values.
    ///
    /// # Returns
    /// A new `Param` instance.
    pub fn new(name: impl Into<String>, value: ArrayD<f32>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.value
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Returns a same-named parameter holding `value` instead.
    pub fn with_value(&self, value: ArrayD<f32>) -> Self {
        Self {
            name: self.name.clone(),
            value,
        }
    }
}

/// An ordered group of parameters sharing the same optimization metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    name: String,
    params: Vec<Param>,
    lr: Option<f32>,
}

impl ParamGroup {
    /// Creates a new `ParamGroup` without a learning rate override.
    ///
    /// # Arguments
    /// * `name` - The name of the group.
    /// * `params` - The ordered parameters of the group.
    ///
    /// # Returns
    /// A new `ParamGroup` instance.
    pub fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            params,
            lr: None,
        }
    }

    /// Sets a learning rate override for every parameter in this group.
    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = Some(lr);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    pub fn lr(&self) -> Option<f32> {
        self.lr
    }

    /// Returns a group with the same name and metadata but with the given parameters.
    pub fn with_params(&self, params: Vec<Param>) -> Self {
        Self {
            name: self.name.clone(),
            params,
            lr: self.lr,
        }
    }
}

/// One full state of a model's trainable weights, organized in groups.
///
/// Cloning a snapshot deep copies every tensor, the clone never aliases the original.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    groups: Vec<ParamGroup>,
}

impl Snapshot {
    /// Creates a new `Snapshot`.
    ///
    /// # Arguments
    /// * `groups` - The ordered parameter groups.
    ///
    /// # Returns
    /// A new `Snapshot` instance.
    pub fn new(groups: Vec<ParamGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    /// Returns the `index`-th parameter of the `group`-th group, if any.
    pub fn param(&self, group: usize, index: usize) -> Option<&Param> {
        self.groups.get(group)?.params.get(index)
    }

    pub fn param_mut(&mut self, group: usize, index: usize) -> Option<&mut Param> {
        self.groups.get_mut(group)?.params.get_mut(index)
    }

    /// Iterates every parameter, group by group.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.groups.iter().flat_map(|g| g.params.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Param> {
        self.groups.iter_mut().flat_map(|g| g.params.iter_mut())
    }

    /// The total amount of scalar values held by this snapshot.
    pub fn num_params(&self) -> usize {
        self.iter().map(|p| p.value.len()).sum()
    }

    /// The shapes of every tensor, grouped the same way as the snapshot.
    pub fn shapes(&self) -> Vec<Vec<Vec<usize>>> {
        self.groups
            .iter()
            .map(|g| g.params.iter().map(|p| p.shape().to_vec()).collect())
            .collect()
    }

    /// Checks that `other` has exactly the same structure as this snapshot.
    ///
    /// # Arguments
    /// * `other` - The snapshot to compare against, taken as the *got* side of the error.
    /// * `what` - A description of `other` for error reporting.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the amount of groups or params differ, or a `DimensionMismatch`
    /// error if any tensor shape differs.
    pub fn check_shapes(&self, other: &Snapshot, what: &'static str) -> Result<()> {
        if self.groups.len() != other.groups.len() {
            return Err(SwarmErr::SizeMismatch {
                what,
                got: other.groups.len(),
                expected: self.groups.len(),
            });
        }

        for (i, (mine, theirs)) in self.groups.iter().zip(&other.groups).enumerate() {
            if mine.params.len() != theirs.params.len() {
                return Err(SwarmErr::SizeMismatch {
                    what,
                    got: theirs.params.len(),
                    expected: mine.params.len(),
                });
            }

            for (j, (p, q)) in mine.params.iter().zip(&theirs.params).enumerate() {
                if p.shape() != q.shape() {
                    return Err(SwarmErr::DimensionMismatch {
                        what,
                        group: i,
                        param: j,
                        got: q.shape().to_vec(),
                        expected: p.shape().to_vec(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Overwrites every value of this snapshot with the values of `other`.
    ///
    /// The write happens in place, every tensor keeps its storage so anything pointing to
    /// these buffers observes the new values.
    ///
    /// # Arguments
    /// * `other` - The values to copy.
    ///
    /// # Returns
    /// An error if the snapshots have different structures.
    pub fn assign(&mut self, other: &Snapshot) -> Result<()> {
        self.check_shapes(other, "assigned snapshot")?;

        for (dst, src) in self.iter_mut().zip(other.iter()) {
            dst.value.assign(&src.value);
        }

        Ok(())
    }

    /// Combines this snapshot with `other` element by element.
    ///
    /// # Arguments
    /// * `other` - The second operand, must have the same structure as `self`.
    /// * `f` - The combinator, receives `(self_value, other_value)`.
    ///
    /// # Returns
    /// A new snapshot with the structure and metadata of `self`.
    pub fn zip_map<F>(&self, other: &Snapshot, mut f: F) -> Result<Snapshot>
    where
        F: FnMut(f32, f32) -> f32,
    {
        self.check_shapes(other, "combined snapshot")?;

        let groups = self
            .groups
            .iter()
            .zip(&other.groups)
            .map(|(a, b)| {
                let params = a
                    .params
                    .iter()
                    .zip(&b.params)
                    .map(|(p, q)| {
                        let value = Zip::from(&p.value)
                            .and(&q.value)
                            .map_collect(|&x, &y| f(x, y));
                        p.with_value(value)
                    })
                    .collect();

                a.with_params(params)
            })
            .collect();

        Ok(Snapshot { groups })
    }

    /// Returns a snapshot with the same structure and every value set to zero.
    pub fn zeros_like(&self) -> Snapshot {
        self.map_params(|p| ArrayD::zeros(p.value.raw_dim()))
    }

    pub fn fill(&mut self, value: f32) {
        self.iter_mut().for_each(|p| p.value.fill(value));
    }

    /// Builds a snapshot with the same structure, computing each tensor from the original one.
    pub fn map_params<F>(&self, mut f: F) -> Snapshot
    where
        F: FnMut(&Param) -> ArrayD<f32>,
    {
        let groups = self
            .groups
            .iter()
            .map(|g| g.with_params(g.params.iter().map(|p| p.with_value(f(p))).collect()))
            .collect();

        Snapshot { groups }
    }

    /// The euclidean distance between this snapshot and `other`, taken over every value.
    pub fn distance(&self, other: &Snapshot) -> Result<f32> {
        let diff = self.zip_map(other, |a, b| (a - b).powi(2))?;
        Ok(diff.iter().map(|p| p.value.sum()).sum::<f32>().sqrt())
    }
}
